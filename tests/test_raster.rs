mod common;

use approx::assert_abs_diff_eq;
use common::*;
use floodstack::io::label::{read_label_geometry, DatePattern};
use floodstack::io::raster::{resample_dataset, AssetReader, GdalAssetReader, ResamplingMethod};
use floodstack::types::{BoundingBox, TargetGrid};
use gdal::Dataset;

/// 8x8 source whose value is `row * 10 + col`, starting 20 m above-left of NEAR_ORIGIN
fn write_gradient(path: &std::path::Path) {
    let (x, y) = NEAR_ORIGIN;
    let data: Vec<f32> = (0..64).map(|i| ((i / 8) * 10 + i % 8) as f32).collect();
    write_geotiff(path, UTM_33N, [x - 20.0, 10.0, 0.0, y + 20.0, 0.0, -10.0], (8, 8), data, Some(-1.0));
}

fn near_grid(resolution: f64) -> TargetGrid {
    let (x, y) = NEAR_ORIGIN;
    TargetGrid::new(BoundingBox::new(x, y - 40.0, x + 40.0, y), UTM_33N, resolution).unwrap()
}

#[test]
fn test_label_geometry_of_fixture() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = write_label(dir.path(), "Bolivia_1", &scene_name(LABEL_DATE), NEAR_ORIGIN);

    let geometry = read_label_geometry(&path, &DatePattern::default()).expect("Failed to read label");
    println!("Label geometry: {:?}", geometry);

    assert_eq!(geometry.epsg, UTM_33N);
    assert_eq!(geometry.size, (4, 4));
    assert_eq!(geometry.bounds, BoundingBox::new(500_000.0, 4_000_000.0, 500_040.0, 4_000_040.0));
    assert_eq!(geometry.date_string().as_deref(), Some("2021-08-15"));

    // Easting 500 km lies on the 15°E central meridian of zone 33
    let geo = geometry.geographic_bounds;
    assert_abs_diff_eq!(geo.min_x, 15.0, epsilon = 1e-6);
    assert!(geo.max_x > geo.min_x && geo.max_x < 15.001);
    assert!(geo.min_y > 36.1 && geo.max_y < 36.2);
}

#[test]
fn test_label_without_date_still_has_geometry() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = write_label(dir.path(), "chip", "no_product_name", NEAR_ORIGIN);
    let geometry = read_label_geometry(&path, &DatePattern::default()).unwrap();
    assert!(geometry.acquisition_date.is_none());
    assert_eq!(geometry.epsg, UTM_33N);
}

#[test]
fn test_nearest_resampling_on_aligned_grid() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("gradient.tif");
    write_gradient(&path);

    let band = GdalAssetReader::new(ResamplingMethod::Nearest)
        .read_onto(path.to_str().unwrap(), &near_grid(10.0))
        .expect("Failed to resample");

    assert_eq!(band.dim(), (4, 4));
    for ((row, col), &v) in band.indexed_iter() {
        assert_eq!(v, ((row + 2) * 10 + col + 2) as f32, "pixel ({}, {})", row, col);
    }
}

#[test]
fn test_bilinear_matches_nearest_on_pixel_centres() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("gradient.tif");
    write_gradient(&path);

    let dataset = Dataset::open(&path).unwrap();
    let nearest = resample_dataset(&dataset, &near_grid(10.0), ResamplingMethod::Nearest).unwrap();
    let bilinear = resample_dataset(&dataset, &near_grid(10.0), ResamplingMethod::Bilinear).unwrap();
    for (a, b) in nearest.iter().zip(bilinear.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
    }
}

#[test]
fn test_coarser_grid_samples_source() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("gradient.tif");
    write_gradient(&path);

    let band = GdalAssetReader::default()
        .read_onto(path.to_str().unwrap(), &near_grid(20.0))
        .unwrap();
    assert_eq!(band.dim(), (2, 2));
    // Centres at 10 m and 30 m into the tile fall in source pixels 3 and 5
    assert_eq!(band[[0, 0]], 33.0);
    assert_eq!(band[[1, 1]], 55.0);
}

#[test]
fn test_nodata_and_outside_become_nan() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("partial.tif");
    let (x, y) = NEAR_ORIGIN;
    // 2x2 source covering only the top-left 20 m of the tile, one pixel nodata
    write_geotiff(&path, UTM_33N, [x, 10.0, 0.0, y, 0.0, -10.0], (2, 2), vec![1.0_f32, -9999.0, 3.0, 4.0], Some(-9999.0));

    let band = GdalAssetReader::default()
        .read_onto(path.to_str().unwrap(), &near_grid(10.0))
        .unwrap();
    assert_eq!(band[[0, 0]], 1.0);
    assert!(band[[0, 1]].is_nan());
    assert_eq!(band[[1, 1]], 4.0);
    assert!(band[[3, 3]].is_nan());
    assert_eq!(band.iter().filter(|v| v.is_nan()).count(), 13);
}

#[test]
fn test_disjoint_asset_is_all_nan() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("elsewhere.tif");
    let (x, y) = FAR_ORIGIN;
    write_geotiff(&path, UTM_33N, [x, 10.0, 0.0, y, 0.0, -10.0], (4, 4), vec![7.0_f32; 16], None);

    let band = GdalAssetReader::default()
        .read_onto(path.to_str().unwrap(), &near_grid(10.0))
        .unwrap();
    assert!(band.iter().all(|v| v.is_nan()));
}

#[test]
fn test_missing_asset_is_read_error() {
    let result = GdalAssetReader::default().read_onto("/nonexistent/vv.tif", &near_grid(10.0));
    assert!(matches!(result, Err(floodstack::StackError::Read(_))));
}
