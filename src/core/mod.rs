//! Core compositing and batch modules

pub mod batch;
pub mod composite;
pub mod selection;

// Re-export main types
pub use batch::{BatchDriver, BatchReport, TileOutcome};
pub use composite::{AssetCollection, CompositeParams, CompositeRaster, NamedBand, StackCompositor, TemporalMean};
pub use selection::{AllMatches, FirstMatch, SceneSelector, SelectionPolicy};
