//! floodstack: flood-segmentation training pairs from Sentinel-1 and NASADEM
//!
//! For every water-label tile the pipeline reads the tile's geometry and
//! acquisition date, finds same-day Sentinel-1 RTC scenes and the covering
//! NASADEM tile in a STAC catalog, composites `vv`, `vh`, `vv_vh` and
//! `elevation` onto the label's grid, and writes a numbered image/label pair.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use config::Config;
pub use core::{BatchDriver, BatchReport, CompositeRaster, StackCompositor, TileOutcome};
pub use io::{extract_date, read_label_geometry, GdalAssetReader, LabelGeometry, PairWriter, StacClient};
pub use types::{BoundingBox, GeoTransform, StackError, StackResult, TargetGrid};
