use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued raster band as stored in a composite
pub type Band = Array2<f32>;

/// EPSG code of the geographic CRS used for catalog searches
pub const WGS84_EPSG: u32 = 4326;

/// Axis-aligned bounding box in the units of some CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// `[west, south, east, north]`, the order STAC expects
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    /// Envelope of a set of points. Non-finite points are ignored.
    pub fn envelope(xs: &[f64], ys: &[f64]) -> Option<Self> {
        let mut bbox: Option<Self> = None;
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            bbox = Some(match bbox {
                None => Self::new(x, y, x, y),
                Some(b) => Self::new(b.min_x.min(x), b.min_y.min(y), b.max_x.max(x), b.max_y.max(y)),
            });
        }
        bbox
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:.6}, {:.6}, {:.6}, {:.6}]",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// Geospatial transformation parameters (GDAL affine order)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map fractional pixel coordinates (col, row) to CRS coordinates
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Inverse affine transform, `None` when the matrix is singular
    pub fn inverse(&self) -> Option<GeoTransform> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < f64::EPSILON {
            return None;
        }

        let inv_a = self.pixel_height / det;
        let inv_b = -self.rotation_x / det;
        let inv_d = -self.rotation_y / det;
        let inv_e = self.pixel_width / det;

        Some(GeoTransform {
            top_left_x: -(inv_a * self.top_left_x + inv_b * self.top_left_y),
            pixel_width: inv_a,
            rotation_x: inv_b,
            top_left_y: -(inv_d * self.top_left_x + inv_e * self.top_left_y),
            rotation_y: inv_d,
            pixel_height: inv_e,
        })
    }

    /// Bounding box covered by a raster of `width` x `height` pixels
    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        let (w, h) = (width as f64, height as f64);
        let xs_ys = [
            self.apply(0.0, 0.0),
            self.apply(w, 0.0),
            self.apply(0.0, h),
            self.apply(w, h),
        ];
        let xs: Vec<f64> = xs_ys.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = xs_ys.iter().map(|p| p.1).collect();
        // Four finite corners always give an envelope
        BoundingBox::envelope(&xs, &ys).unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }
}

/// The lattice every output band is resampled onto, derived from a label tile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetGrid {
    pub bounds: BoundingBox,
    pub epsg: u32,
    pub resolution: f64,
}

impl TargetGrid {
    pub fn new(bounds: BoundingBox, epsg: u32, resolution: f64) -> StackResult<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(StackError::Composition(format!(
                "target resolution must be positive, got {}",
                resolution
            )));
        }
        if !(bounds.width() > 0.0 && bounds.height() > 0.0) {
            return Err(StackError::Composition(format!(
                "target bounds {} are degenerate",
                bounds
            )));
        }
        Ok(Self { bounds, epsg, resolution })
    }

    pub fn width(&self) -> usize {
        cell_count(self.bounds.width(), self.resolution)
    }

    pub fn height(&self) -> usize {
        cell_count(self.bounds.height(), self.resolution)
    }

    /// `(rows, cols)`, matching ndarray's dimension order
    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    /// North-up transform anchored at the top-left corner of the bounds
    pub fn geo_transform(&self) -> GeoTransform {
        GeoTransform {
            top_left_x: self.bounds.min_x,
            pixel_width: self.resolution,
            rotation_x: 0.0,
            top_left_y: self.bounds.max_y,
            rotation_y: 0.0,
            pixel_height: -self.resolution,
        }
    }

    /// CRS coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.geo_transform().apply(col as f64 + 0.5, row as f64 + 0.5)
    }
}

// Extents within 1e-6 cells of a whole multiple do not gain an extra column.
fn cell_count(extent: f64, resolution: f64) -> usize {
    let cells = extent / resolution;
    let rounded = cells.round();
    let count = if (cells - rounded).abs() < 1e-6 {
        rounded
    } else {
        cells.ceil()
    };
    (count as usize).max(1)
}

/// Error types for the pairing pipeline
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Read error: {0}")]
    Read(String),

    #[error("No acquisition date: {0}")]
    DateParse(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("No items found in collection '{collection}'")]
    EmptyResult { collection: String },

    #[error("Composition error: {0}")]
    Composition(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StackError {
    /// Errors that mean "nothing to pair here" rather than "something broke"
    pub fn is_skip(&self) -> bool {
        matches!(self, StackError::DateParse(_) | StackError::EmptyResult { .. })
    }
}

/// Result type for pipeline operations
pub type StackResult<T> = Result<T, StackError>;
