//! GeoTIFF fixtures and a local catalog for integration tests.
#![allow(dead_code)]

use floodstack::io::crs;
use floodstack::io::stac::{Catalog, SearchRequest, StacItem};
use floodstack::{Config, StackError, StackResult};
use gdal::raster::{Buffer, GdalType};
use gdal::DriverManager;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const UTM_33N: u32 = 32633;
pub const LABEL_DATE: &str = "20210815";

/// Top-left corner of the label tile near the DEM (≈ 15.0°E, 36.1°N)
pub const NEAR_ORIGIN: (f64, f64) = (500_000.0, 4_000_040.0);
/// Top-left corner of a label tile east of the DEM coverage (≈ 17.2°E)
pub const FAR_ORIGIN: (f64, f64) = (700_000.0, 4_000_040.0);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn write_geotiff<T: GdalType + Copy>(
    path: &Path,
    epsg: u32,
    geo_transform: [f64; 6],
    size: (usize, usize),
    data: Vec<T>,
    nodata: Option<f64>,
) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create fixture directory");
    }
    let driver = DriverManager::get_driver_by_name("GTiff").expect("GTiff driver missing");
    let mut dataset = driver
        .create_with_band_type::<T, _>(path, size.0 as isize, size.1 as isize, 1)
        .expect("Failed to create fixture");
    dataset.set_geo_transform(&geo_transform).expect("Failed to set geotransform");
    dataset
        .set_spatial_ref(&crs::spatial_ref_from_epsg(epsg).expect("Unknown EPSG"))
        .expect("Failed to set CRS");

    let mut band = dataset.rasterband(1).expect("Missing band");
    band.write((0, 0), size, &Buffer::new(size, data)).expect("Failed to write fixture");
    if let Some(nodata) = nodata {
        band.set_no_data_value(Some(nodata)).expect("Failed to set nodata");
    }
}

/// 4x4 10 m water mask (`u8`, nodata 255) under `base/chips/<chip>/s1/<scene>/LabelWater.tif`
pub fn write_label(base: &Path, chip: &str, scene: &str, origin: (f64, f64)) -> PathBuf {
    let path = base.join("chips").join(chip).join("s1").join(scene).join("LabelWater.tif");
    let data: Vec<u8> = vec![0, 0, 1, 1, 0, 1, 1, 1, 0, 0, 1, 255, 0, 0, 0, 1];
    write_geotiff(
        &path,
        UTM_33N,
        [origin.0, 10.0, 0.0, origin.1, 0.0, -10.0],
        (4, 4),
        data,
        Some(255.0),
    );
    path
}

pub fn scene_name(date: &str) -> String {
    format!("S1A_IW_GRDH_1SDV_{date}T103212_{date}T103237_039225_04A0C5_B2F1")
}

/// Constant float32 SAR band covering the near tile with a 20 m margin
pub fn write_sar_band(path: &Path, value: f32) {
    let (x, y) = NEAR_ORIGIN;
    write_geotiff(
        path,
        UTM_33N,
        [x - 20.0, 10.0, 0.0, y + 20.0, 0.0, -10.0],
        (8, 8),
        vec![value; 64],
        None,
    );
}

/// Constant Int16 geographic DEM tile covering 14.9-15.1°E, 36.0-36.3°N
pub fn write_dem(path: &Path, value: i16) {
    write_geotiff(
        path,
        floodstack::types::WGS84_EPSG,
        [14.9, 0.01, 0.0, 36.3, 0.0, -0.01],
        (20, 30),
        vec![value; 600],
        Some(-32768.0),
    );
}

pub fn sar_item(id: &str, date: &str, assets: &[(&str, &Path)]) -> StacItem {
    let assets: serde_json::Map<String, serde_json::Value> = assets
        .iter()
        .map(|(key, path)| (key.to_string(), serde_json::json!({ "href": path.to_string_lossy() })))
        .collect();
    serde_json::from_value(serde_json::json!({
        "id": id,
        "collection": "sentinel-1-rtc",
        "bbox": [10.0, 30.0, 20.0, 40.0],
        "properties": { "datetime": format!("{date}T10:32:24Z") },
        "assets": assets,
    }))
    .expect("Invalid SAR item fixture")
}

pub fn dem_item(path: &Path) -> StacItem {
    serde_json::from_value(serde_json::json!({
        "id": "NASADEM_HGT_n36e014",
        "collection": "nasadem",
        "bbox": [14.9, 36.0, 15.1, 36.3],
        "properties": { "datetime": null },
        "assets": { "elevation": { "href": path.to_string_lossy() } },
    }))
    .expect("Invalid DEM item fixture")
}

/// In-memory catalog filtering by collection, bbox overlap and day
#[derive(Default)]
pub struct LocalCatalog {
    pub items: Vec<StacItem>,
    pub requests: Mutex<Vec<SearchRequest>>,
    pub fail: bool,
}

impl LocalCatalog {
    pub fn new(items: Vec<StacItem>) -> Self {
        Self { items, ..Self::default() }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Catalog for LocalCatalog {
    fn search(&self, request: &SearchRequest) -> StackResult<Vec<StacItem>> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(StackError::Catalog("connection refused".into()));
        }

        let day = request.datetime.as_deref().map(|d| &d[..10]);
        let [w, s, e, n] = request.bbox;
        Ok(self
            .items
            .iter()
            .filter(|item| item.collection.as_deref() == Some(request.collection()))
            .filter(|item| match item.bbox.as_deref() {
                Some([bw, bs, be, bn]) => *bw <= e && *be >= w && *bs <= n && *bn >= s,
                _ => true,
            })
            .filter(|item| match (day, item.datetime()) {
                (Some(day), Some(dt)) => dt.starts_with(day),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .cloned()
            .collect())
    }
}

/// Config reading from `base/chips`, writing to `base/out`, with local hrefs
pub fn test_config(base: &Path) -> Config {
    let mut config = Config::default();
    config.input.base_dir = base.join("chips");
    config.output.dir = base.join("out");
    config.processing.threads = 2;
    config
}

/// Constant `vv` and `vh` assets for one scene
pub fn write_scene_assets(base: &Path, name: &str, vv: f32, vh: f32) -> (PathBuf, PathBuf) {
    let vv_path = base.join("assets").join(name).join("vv.tif");
    let vh_path = base.join("assets").join(name).join("vh.tif");
    write_sar_band(&vv_path, vv);
    write_sar_band(&vh_path, vh);
    (vv_path, vh_path)
}
