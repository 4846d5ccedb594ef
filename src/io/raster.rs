use crate::io::crs;
use crate::types::{Band, GeoTransform, StackError, StackResult, TargetGrid};
use gdal::spatial_ref::CoordTransform;
use gdal::Dataset;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Interpolation used when materialising an asset onto the target grid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResamplingMethod {
    #[default]
    Nearest,
    Bilinear,
}

/// Materialises one asset's pixels on a target grid.
///
/// Implementations return a band of exactly `grid.shape()`, with NaN wherever
/// the asset has no data.
pub trait AssetReader: Send + Sync {
    fn read_onto(&self, href: &str, grid: &TargetGrid) -> StackResult<Band>;
}

/// GDAL-backed reader: local paths are opened directly, http(s) hrefs through `/vsicurl/`
pub struct GdalAssetReader {
    method: ResamplingMethod,
}

impl GdalAssetReader {
    pub fn new(method: ResamplingMethod) -> Self {
        Self { method }
    }
}

impl Default for GdalAssetReader {
    fn default() -> Self {
        Self::new(ResamplingMethod::default())
    }
}

impl AssetReader for GdalAssetReader {
    fn read_onto(&self, href: &str, grid: &TargetGrid) -> StackResult<Band> {
        let path = gdal_path(href);
        log::debug!("Opening asset: {}", path);

        let dataset = Dataset::open(&path)
            .map_err(|e| StackError::Read(format!("cannot open asset {}: {}", href, e)))?;
        resample_dataset(&dataset, grid, self.method)
    }
}

/// GDAL path for an asset href
pub fn gdal_path(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        format!("/vsicurl/{}", href)
    } else {
        href.to_string()
    }
}

/// Source pixel window `[x_off, x_off + width) x [y_off, y_off + height)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SourceWindow {
    x_off: usize,
    y_off: usize,
    width: usize,
    height: usize,
}

impl SourceWindow {
    /// Smallest window holding every finite position plus a one-pixel margin,
    /// clipped to the raster. `None` when nothing falls inside.
    fn covering(cols: &[f64], rows: &[f64], raster_width: usize, raster_height: usize) -> Option<Self> {
        let mut min_c = f64::INFINITY;
        let mut max_c = f64::NEG_INFINITY;
        let mut min_r = f64::INFINITY;
        let mut max_r = f64::NEG_INFINITY;

        for (&c, &r) in cols.iter().zip(rows.iter()) {
            if !c.is_finite() || !r.is_finite() {
                continue;
            }
            min_c = min_c.min(c);
            max_c = max_c.max(c);
            min_r = min_r.min(r);
            max_r = max_r.max(r);
        }

        let (w, h) = (raster_width as f64, raster_height as f64);
        if !min_c.is_finite() || max_c < 0.0 || max_r < 0.0 || min_c >= w || min_r >= h {
            return None;
        }

        let x0 = (min_c.floor() - 1.0).max(0.0) as usize;
        let y0 = (min_r.floor() - 1.0).max(0.0) as usize;
        let x1 = ((max_c.floor() + 2.0).min(w)) as usize;
        let y1 = ((max_r.floor() + 2.0).min(h)) as usize;

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self { x_off: x0, y_off: y0, width: x1 - x0, height: y1 - y0 })
    }
}

/// Resample band 1 of `dataset` onto `grid`.
///
/// Every target pixel centre is transformed into the source CRS, located in
/// source pixel space and sampled. Only the source window covering the grid
/// is read. Source nodata and pixels outside the source become NaN.
pub fn resample_dataset(
    dataset: &Dataset,
    grid: &TargetGrid,
    method: ResamplingMethod,
) -> StackResult<Band> {
    let (rows, cols) = grid.shape();
    let (raster_width, raster_height) = dataset.raster_size();

    let source_transform = dataset
        .geo_transform()
        .map(GeoTransform::from_gdal)
        .map_err(|e| StackError::Read(format!("asset has no geotransform: {}", e)))?;
    let inverse = source_transform
        .inverse()
        .ok_or_else(|| StackError::Read("asset geotransform is not invertible".into()))?;

    let source_srs = crs::dataset_spatial_ref(dataset)
        .ok_or_else(|| StackError::Read("asset has no CRS".into()))?;

    // Step 1: target pixel centres in target CRS
    let mut xs = Vec::with_capacity(rows * cols);
    let mut ys = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let (x, y) = grid.pixel_center(row, col);
            xs.push(x);
            ys.push(y);
        }
    }

    // Step 2: into source CRS
    if crs::epsg_code(&source_srs) != Some(grid.epsg) {
        let target_srs = crs::spatial_ref_from_epsg(grid.epsg)?;
        let transform = CoordTransform::new(&target_srs, &source_srs)?;
        let mut zs = vec![0.0; xs.len()];
        transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
    }

    // Step 3: into fractional source pixel coordinates
    let (src_cols, src_rows): (Vec<f64>, Vec<f64>) = xs
        .iter()
        .zip(ys.iter())
        .map(|(&x, &y)| inverse.apply(x, y))
        .unzip();

    let Some(window) = SourceWindow::covering(&src_cols, &src_rows, raster_width, raster_height) else {
        log::debug!("Asset does not overlap the target grid");
        return Ok(Array2::from_elem((rows, cols), f32::NAN));
    };

    // Step 4: read only the covering window
    let rasterband = dataset.rasterband(1)?;
    let buffer = rasterband.read_as::<f32>(
        (window.x_off as isize, window.y_off as isize),
        (window.width, window.height),
        (window.width, window.height),
        None,
    )?;
    let mut source = Array2::from_shape_vec((window.height, window.width), buffer.data)
        .map_err(|e| StackError::Read(format!("Failed to reshape asset window: {}", e)))?;

    if let Some(nodata) = rasterband.no_data_value() {
        let nodata = nodata as f32;
        source.mapv_inplace(|v| if v == nodata { f32::NAN } else { v });
    }

    log::debug!(
        "Resampling {}x{} source window at ({}, {}) onto {}x{} grid",
        window.width,
        window.height,
        window.x_off,
        window.y_off,
        cols,
        rows
    );

    // Step 5: sample
    let sampler = WindowSampler {
        data: &source,
        x_off: window.x_off as f64,
        y_off: window.y_off as f64,
    };
    let mut output = Array2::from_elem((rows, cols), f32::NAN);

    let sample = |(row, col): (usize, usize), value: &mut f32| {
        let idx = row * cols + col;
        *value = match method {
            ResamplingMethod::Nearest => sampler.nearest(src_cols[idx], src_rows[idx]),
            ResamplingMethod::Bilinear => sampler.bilinear(src_cols[idx], src_rows[idx]),
        };
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut output).par_for_each(sample);
    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut output).for_each(sample);

    Ok(output)
}

/// Samples a source window given full-raster fractional pixel coordinates
struct WindowSampler<'a> {
    data: &'a Array2<f32>,
    x_off: f64,
    y_off: f64,
}

impl WindowSampler<'_> {
    fn get(&self, col: f64, row: f64) -> Option<f32> {
        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }
        let (c, r) = (col as usize, row as usize);
        let (h, w) = self.data.dim();
        if c >= w || r >= h {
            return None;
        }
        Some(self.data[[r, c]])
    }

    /// Value of the source pixel containing the point
    fn nearest(&self, col: f64, row: f64) -> f32 {
        self.get((col - self.x_off).floor(), (row - self.y_off).floor())
            .unwrap_or(f32::NAN)
    }

    /// Bilinear interpolation between the four nearest pixel centres.
    /// Falls back to nearest when a neighbour is missing or NaN.
    fn bilinear(&self, col: f64, row: f64) -> f32 {
        let x = col - self.x_off - 0.5;
        let y = row - self.y_off - 0.5;
        let (x1, y1) = (x.floor(), y.floor());

        let neighbours = (
            self.get(x1, y1),
            self.get(x1 + 1.0, y1),
            self.get(x1, y1 + 1.0),
            self.get(x1 + 1.0, y1 + 1.0),
        );
        let (Some(v11), Some(v21), Some(v12), Some(v22)) = neighbours else {
            return self.nearest(col, row);
        };
        if v11.is_nan() || v21.is_nan() || v12.is_nan() || v22.is_nan() {
            return self.nearest(col, row);
        }

        let dx = x - x1;
        let dy = y - y1;
        let interpolated = v11 as f64 * (1.0 - dx) * (1.0 - dy)
            + v21 as f64 * dx * (1.0 - dy)
            + v12 as f64 * (1.0 - dx) * dy
            + v22 as f64 * dx * dy;

        interpolated as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_gdal_path() {
        assert_eq!(gdal_path("https://a.blob.core.windows.net/c/vv.tif?sig=x"), "/vsicurl/https://a.blob.core.windows.net/c/vv.tif?sig=x");
        assert_eq!(gdal_path("/data/vv.tif"), "/data/vv.tif");
    }

    #[test]
    fn test_window_covering_clips_to_raster() {
        let cols = [-3.0, 2.5, 7.9];
        let rows = [1.2, 4.0, 30.0];
        let window = SourceWindow::covering(&cols, &rows, 6, 10).unwrap();
        assert_eq!(window, SourceWindow { x_off: 0, y_off: 0, width: 6, height: 10 });
    }

    #[test]
    fn test_window_covering_interior() {
        let cols = [10.2, 12.8];
        let rows = [20.5, 21.5];
        let window = SourceWindow::covering(&cols, &rows, 100, 100).unwrap();
        assert_eq!(window, SourceWindow { x_off: 9, y_off: 19, width: 5, height: 4 });
    }

    #[test]
    fn test_window_covering_disjoint() {
        assert!(SourceWindow::covering(&[120.0, 130.0], &[5.0, 6.0], 100, 100).is_none());
        assert!(SourceWindow::covering(&[f64::NAN], &[f64::NAN], 100, 100).is_none());
    }

    #[test]
    fn test_nearest_sampling_with_offset() {
        let data = array![[1.0_f32, 2.0], [3.0, 4.0]];
        let sampler = WindowSampler { data: &data, x_off: 10.0, y_off: 20.0 };
        assert_eq!(sampler.nearest(11.7, 20.1), 2.0);
        assert_eq!(sampler.nearest(10.0, 21.99), 3.0);
        assert!(sampler.nearest(9.9, 20.0).is_nan());
        assert!(sampler.nearest(12.0, 20.0).is_nan());
    }

    #[test]
    fn test_bilinear_midpoint() {
        let data = array![[0.0_f32, 10.0], [20.0, 30.0]];
        let sampler = WindowSampler { data: &data, x_off: 0.0, y_off: 0.0 };
        // Exactly between the four pixel centres
        assert!((sampler.bilinear(1.0, 1.0) - 15.0).abs() < 1e-6);
        // On a pixel centre
        assert!((sampler.bilinear(0.5, 0.5) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_bilinear_falls_back_near_nan() {
        let data = array![[1.0_f32, f32::NAN], [3.0, 4.0]];
        let sampler = WindowSampler { data: &data, x_off: 0.0, y_off: 0.0 };
        assert_eq!(sampler.bilinear(0.9, 0.9), 1.0);
    }
}
