use crate::core::composite::CompositeRaster;
use crate::io::crs;
use crate::io::label::LabelGeometry;
use crate::types::{StackError, StackResult};
use gdal::raster::{Buffer, GdalDataType, GdalType};
use gdal::{Dataset, DriverManager, Metadata};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Paths of one written training pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPair {
    pub index: usize,
    pub image: PathBuf,
    pub label: PathBuf,
}

/// Writes numbered image/label GeoTIFF pairs.
///
/// Both files are written to hidden temporary files in their target
/// directories and renamed into place only once both are complete, so a
/// failed tile never leaves half a pair behind.
pub struct PairWriter {
    images_dir: PathBuf,
    labels_dir: PathBuf,
    index_width: usize,
}

impl PairWriter {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(images_dir: P, labels_dir: Q, index_width: usize) -> Self {
        Self {
            images_dir: images_dir.into(),
            labels_dir: labels_dir.into(),
            index_width,
        }
    }

    /// Create both output directories if missing
    pub fn ensure_dirs(&self) -> StackResult<()> {
        for dir in [&self.images_dir, &self.labels_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                StackError::Write(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn labels_dir(&self) -> &Path {
        &self.labels_dir
    }

    /// `0000.tif` for index 0 at width 4
    pub fn file_name(&self, index: usize) -> String {
        format!("{:0width$}.tif", index, width = self.index_width)
    }

    pub fn image_path(&self, index: usize) -> PathBuf {
        self.images_dir.join(self.file_name(index))
    }

    pub fn label_path(&self, index: usize) -> PathBuf {
        self.labels_dir.join(self.file_name(index))
    }

    /// Write `composite` and a copy of the label tile under `index`.
    /// Existing files with the same index are replaced.
    pub fn write_pair(
        &self,
        index: usize,
        composite: &CompositeRaster,
        label: &LabelGeometry,
    ) -> StackResult<OutputPair> {
        let image_path = self.image_path(index);
        let label_path = self.label_path(index);

        let image_tmp = temp_path_in(&self.images_dir)?;
        let label_tmp = temp_path_in(&self.labels_dir)?;

        write_image(&image_tmp, composite)?;
        copy_label(&label_tmp, label)?;
        make_shareable(&image_tmp)?;
        make_shareable(&label_tmp)?;

        image_tmp.persist(&image_path).map_err(|e| {
            StackError::Write(format!("cannot move image into {}: {}", image_path.display(), e.error))
        })?;
        if let Err(e) = label_tmp.persist(&label_path) {
            // Neither half of this index may survive, including a previous run's label
            discard(&image_path);
            discard(&label_path);
            return Err(StackError::Write(format!(
                "cannot move label into {}: {}",
                label_path.display(),
                e.error
            )));
        }

        log::debug!("Wrote pair {} -> {}, {}", index, image_path.display(), label_path.display());
        Ok(OutputPair { index, image: image_path, label: label_path })
    }
}

fn temp_path_in(dir: &Path) -> StackResult<TempPath> {
    let file = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tif")
        .tempfile_in(dir)
        .map_err(|e| StackError::Write(format!("cannot create temporary file in {}: {}", dir.display(), e)))?;
    Ok(file.into_temp_path())
}

/// Temporary files are created owner-only; published pairs are world-readable
#[cfg(unix)]
fn make_shareable(path: &Path) -> StackResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(OUTPUT_MODE)).map_err(|e| {
        StackError::Write(format!("cannot set permissions on {}: {}", path.display(), e))
    })
}

#[cfg(not(unix))]
fn make_shareable(_path: &Path) -> StackResult<()> {
    Ok(())
}

/// Mode of published image and label files
#[cfg(unix)]
pub const OUTPUT_MODE: u32 = 0o644;

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not remove {}: {}", path.display(), e),
    }
}

/// Multi-band float32 GeoTIFF with band descriptions and NaN nodata
fn write_image(path: &Path, composite: &CompositeRaster) -> StackResult<()> {
    let (rows, cols) = composite.shape();
    let write_err = |e: gdal::errors::GdalError| {
        StackError::Write(format!("writing image {}: {}", path.display(), e))
    };

    let driver = DriverManager::get_driver_by_name("GTiff").map_err(write_err)?;
    let mut dataset = driver
        .create_with_band_type::<f32, _>(
            path,
            cols as isize,
            rows as isize,
            composite.bands().len() as isize,
        )
        .map_err(write_err)?;

    dataset
        .set_geo_transform(&composite.geo_transform().to_gdal())
        .map_err(write_err)?;
    dataset
        .set_spatial_ref(&crs::spatial_ref_from_epsg(composite.epsg())?)
        .map_err(write_err)?;

    for (i, band) in composite.bands().iter().enumerate() {
        let mut rasterband = dataset.rasterband(i as isize + 1).map_err(write_err)?;
        let flat_data: Vec<f32> = band.data.iter().cloned().collect();
        let buffer = Buffer::new((cols, rows), flat_data);
        rasterband.write((0, 0), (cols, rows), &buffer).map_err(write_err)?;
        rasterband.set_no_data_value(Some(f64::NAN)).map_err(write_err)?;
        rasterband.set_description(&band.name).map_err(write_err)?;
    }

    Ok(())
}

/// Re-write the label tile pixel for pixel in its native data type
fn copy_label(path: &Path, label: &LabelGeometry) -> StackResult<()> {
    let source = Dataset::open(&label.path).map_err(|e| {
        StackError::Write(format!("cannot reopen label {}: {}", label.path.display(), e))
    })?;
    let band_type = source.rasterband(1)?.band_type();

    match band_type {
        GdalDataType::UInt8 => copy_bands::<u8>(&source, path, label),
        GdalDataType::UInt16 => copy_bands::<u16>(&source, path, label),
        GdalDataType::Int16 => copy_bands::<i16>(&source, path, label),
        GdalDataType::UInt32 => copy_bands::<u32>(&source, path, label),
        GdalDataType::Int32 => copy_bands::<i32>(&source, path, label),
        _ => copy_bands::<f32>(&source, path, label),
    }
}

fn copy_bands<T: GdalType + Copy>(source: &Dataset, path: &Path, label: &LabelGeometry) -> StackResult<()> {
    let (width, height) = label.size;
    let write_err = |e: gdal::errors::GdalError| {
        StackError::Write(format!("writing label {}: {}", path.display(), e))
    };

    let count = source.raster_count();
    let driver = DriverManager::get_driver_by_name("GTiff").map_err(write_err)?;
    let mut dataset = driver
        .create_with_band_type::<T, _>(path, width as isize, height as isize, count)
        .map_err(write_err)?;

    dataset.set_geo_transform(&label.geo_transform.to_gdal()).map_err(write_err)?;
    dataset
        .set_spatial_ref(&crs::spatial_ref_from_epsg(label.epsg)?)
        .map_err(write_err)?;

    for index in 1..=count {
        let src_band = source.rasterband(index)?;
        let buffer = src_band.read_as::<T>((0, 0), (width, height), (width, height), None)?;

        let mut dst_band = dataset.rasterband(index).map_err(write_err)?;
        dst_band.write((0, 0), (width, height), &buffer).map_err(write_err)?;
        if let Some(nodata) = src_band.no_data_value() {
            dst_band.set_no_data_value(Some(nodata)).map_err(write_err)?;
        }
    }

    Ok(())
}
