//! I/O modules: label tiles, STAC catalog, raster assets and output pairs

pub mod crs;
pub mod label;
pub mod raster;
pub mod stac;
pub mod writer;

pub use label::{extract_date, read_label_geometry, DatePattern, LabelGeometry};
pub use raster::{AssetReader, GdalAssetReader, ResamplingMethod};
pub use stac::{Catalog, SearchRequest, StacClient, StacItem};
pub use writer::{OutputPair, PairWriter};
