//! Spatial reference helpers shared by the label reader and the resampler.
//!
//! All references are put in traditional GIS axis order so that x is always
//! easting/longitude, regardless of how the authority defines the axes.

use crate::types::{BoundingBox, StackError, StackResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::Dataset;

/// Points sampled along each edge when reprojecting a bounding box
const EDGE_SAMPLES: usize = 21;

/// EPSG reference in (x, y) = (lon, lat) / (easting, northing) order
pub fn spatial_ref_from_epsg(epsg: u32) -> StackResult<SpatialRef> {
    let srs = SpatialRef::from_epsg(epsg)?;
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(srs)
}

/// Dataset reference, or `None` when the raster carries no CRS
pub fn dataset_spatial_ref(dataset: &Dataset) -> Option<SpatialRef> {
    let srs = dataset.spatial_ref().ok()?;
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Some(srs)
}

/// EPSG code of a reference, trying GDAL's auto-identification as a fallback
pub fn epsg_code(srs: &SpatialRef) -> Option<u32> {
    if let Some(code) = epsg_authority(srs) {
        return Some(code);
    }

    let mut identified = srs.clone();
    if identified.auto_identify_epsg().is_ok() {
        return epsg_authority(&identified);
    }
    None
}

fn epsg_authority(srs: &SpatialRef) -> Option<u32> {
    let name = srs.auth_name().ok()?;
    if !name.eq_ignore_ascii_case("EPSG") {
        return None;
    }
    srs.auth_code().ok().and_then(|code| u32::try_from(code).ok())
}

/// Reproject a bounding box by transforming a densified ring and taking the envelope.
pub fn transform_bounds(
    bbox: &BoundingBox,
    source: &SpatialRef,
    target: &SpatialRef,
) -> StackResult<BoundingBox> {
    let transform = CoordTransform::new(source, target)?;

    let mut xs = Vec::with_capacity(EDGE_SAMPLES * 4);
    let mut ys = Vec::with_capacity(EDGE_SAMPLES * 4);
    for i in 0..EDGE_SAMPLES {
        let t = i as f64 / (EDGE_SAMPLES - 1) as f64;
        let x = bbox.min_x + t * bbox.width();
        let y = bbox.min_y + t * bbox.height();

        xs.extend_from_slice(&[x, x, bbox.min_x, bbox.max_x]);
        ys.extend_from_slice(&[bbox.min_y, bbox.max_y, y, y]);
    }
    let mut zs = vec![0.0; xs.len()];

    transform.transform_coords(&mut xs, &mut ys, &mut zs)?;

    BoundingBox::envelope(&xs, &ys).ok_or_else(|| {
        StackError::Read(format!("bounding box {} has no finite reprojection", bbox))
    })
}
