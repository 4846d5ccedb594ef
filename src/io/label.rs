use crate::io::crs;
use crate::types::{BoundingBox, GeoTransform, StackError, StackResult, WGS84_EPSG};
use chrono::NaiveDate;
use gdal::Dataset;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Sentinel-1 GRD product name fragment carrying the acquisition date
pub const DEFAULT_DATE_PATTERN: &str = r"S1[AB]_IW_GRDH_1SDV_(\d{8})";

/// Acquisition date extractor for label filenames
#[derive(Debug, Clone)]
pub struct DatePattern {
    regex: Regex,
}

impl DatePattern {
    /// Compile a pattern whose first capture group holds an 8-digit `YYYYMMDD` date
    pub fn new(pattern: &str) -> StackResult<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| StackError::Config(format!("invalid date pattern '{}': {}", pattern, e)))?;
        if regex.captures_len() < 2 {
            return Err(StackError::Config(format!(
                "date pattern '{}' has no capture group",
                pattern
            )));
        }
        Ok(Self { regex })
    }

    /// Parse the acquisition date, `None` when the name does not match
    /// or the digits are not a calendar date.
    pub fn parse(&self, filename: &str) -> Option<NaiveDate> {
        let captures = self.regex.captures(filename)?;
        let digits = captures.get(1)?.as_str();
        if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
    }

    /// Same as [`parse`](Self::parse), formatted as `YYYY-MM-DD`
    pub fn extract(&self, filename: &str) -> Option<String> {
        self.parse(filename).map(|d| d.format("%Y-%m-%d").to_string())
    }
}

impl Default for DatePattern {
    fn default() -> Self {
        static DEFAULT: OnceLock<Regex> = OnceLock::new();
        let regex = DEFAULT
            .get_or_init(|| Regex::new(DEFAULT_DATE_PATTERN).expect("default date pattern compiles"))
            .clone();
        Self { regex }
    }
}

/// Extract the acquisition date (`YYYY-MM-DD`) from a Sentinel-1 style filename
pub fn extract_date(filename: &str) -> Option<String> {
    DatePattern::default().extract(filename)
}

/// Geometry and date of one label tile
#[derive(Debug, Clone)]
pub struct LabelGeometry {
    pub path: PathBuf,
    /// Native CRS of the label raster
    pub epsg: u32,
    /// Bounds in native CRS units
    pub bounds: BoundingBox,
    /// Bounds reprojected to EPSG:4326, for catalog searches
    pub geographic_bounds: BoundingBox,
    pub acquisition_date: Option<NaiveDate>,
    pub geo_transform: GeoTransform,
    /// `(width, height)` in pixels
    pub size: (usize, usize),
}

impl LabelGeometry {
    /// Acquisition date as `YYYY-MM-DD`
    pub fn date_string(&self) -> Option<String> {
        self.acquisition_date.map(|d| d.format("%Y-%m-%d").to_string())
    }
}

/// Read CRS, native and geographic bounds, and acquisition date of a label tile.
///
/// The date is matched against the full path, so a date carried by a parent
/// directory name is found as well. A missing date is reported through
/// `acquisition_date`, not as an error.
pub fn read_label_geometry<P: AsRef<Path>>(
    path: P,
    pattern: &DatePattern,
) -> StackResult<LabelGeometry> {
    let path = path.as_ref();
    log::debug!("Reading label geometry: {}", path.display());

    let dataset = Dataset::open(path)
        .map_err(|e| StackError::Read(format!("cannot open {}: {}", path.display(), e)))?;

    let size = dataset.raster_size();
    if size.0 == 0 || size.1 == 0 {
        return Err(StackError::Read(format!("{} has an empty raster", path.display())));
    }

    let geo_transform = dataset
        .geo_transform()
        .map(GeoTransform::from_gdal)
        .map_err(|e| StackError::Read(format!("{} has no geotransform: {}", path.display(), e)))?;

    let native_srs = crs::dataset_spatial_ref(&dataset)
        .ok_or_else(|| StackError::Read(format!("{} has no CRS", path.display())))?;
    let epsg = crs::epsg_code(&native_srs).ok_or_else(|| {
        StackError::Read(format!("CRS of {} has no EPSG authority", path.display()))
    })?;

    let bounds = geo_transform.bounds(size.0, size.1);
    let wgs84 = crs::spatial_ref_from_epsg(WGS84_EPSG)?;
    let geographic_bounds = if epsg == WGS84_EPSG {
        bounds
    } else {
        crs::transform_bounds(&bounds, &native_srs, &wgs84)?
    };

    let acquisition_date = pattern.parse(&path.to_string_lossy());

    log::debug!(
        "Label EPSG:{} bounds {} (geographic {}), date {:?}",
        epsg,
        bounds,
        geographic_bounds,
        acquisition_date
    );

    Ok(LabelGeometry {
        path: path.to_path_buf(),
        epsg,
        bounds,
        geographic_bounds,
        acquisition_date,
        geo_transform,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_date_from_grd_name() {
        let name = "chips/Bolivia_103757/s1/S1A_IW_GRDH_1SDV_20210815T103212_20210815T103237_039225_04A0C5_B2F1/LabelWater.tif";
        assert_eq!(extract_date(name), Some("2021-08-15".to_string()));
    }

    #[test]
    fn test_extract_date_accepts_s1b() {
        assert_eq!(
            extract_date("S1B_IW_GRDH_1SDV_20190301T000000_important.tif"),
            Some("2019-03-01".to_string())
        );
    }

    #[test]
    fn test_extract_date_rejects_other_products() {
        assert_eq!(extract_date("S1A_IW_SLC__1SDV_20210815T103212.zip"), None);
        assert_eq!(extract_date("S2A_MSIL2A_20240615T105621.tif"), None);
        assert_eq!(extract_date("LabelWater.tif"), None);
        assert_eq!(extract_date(""), None);
    }

    #[test]
    fn test_extract_date_rejects_impossible_calendar_date() {
        assert_eq!(extract_date("S1A_IW_GRDH_1SDV_20211345_x.tif"), None);
    }

    #[test]
    fn test_custom_pattern() {
        let pattern = DatePattern::new(r"label_(\d{8})").unwrap();
        assert_eq!(pattern.extract("label_20200229.tif"), Some("2020-02-29".to_string()));
        assert_eq!(pattern.extract("label_20190229.tif"), None);
    }

    #[test]
    fn test_pattern_without_group_is_rejected() {
        assert!(DatePattern::new(r"\d{8}").is_err());
        assert!(DatePattern::new(r"(unclosed").is_err());
    }

    #[test]
    fn test_unreadable_label_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S1A_IW_GRDH_1SDV_20210815_broken.tif");
        std::fs::write(&path, b"not a tiff").unwrap();

        let err = read_label_geometry(&path, &DatePattern::default()).unwrap_err();
        assert!(matches!(err, StackError::Read(_)), "got {:?}", err);
    }
}
