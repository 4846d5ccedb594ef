//! Batch driver: label tiles in, numbered training pairs out.
//!
//! Tiles are processed one after another. A tile that cannot be paired is
//! logged and counted, and the batch moves on; only failing to set up the
//! output directories stops a run.

use crate::config::Config;
use crate::core::composite::{AssetCollection, CompositeParams, StackCompositor};
use crate::core::selection::SceneSelector;
use crate::io::label::{read_label_geometry, DatePattern};
use crate::io::raster::AssetReader;
use crate::io::stac::{Catalog, SearchRequest};
use crate::io::writer::{OutputPair, PairWriter};
use crate::types::{StackError, StackResult, TargetGrid};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Result of processing one label tile
#[derive(Debug)]
pub enum TileOutcome {
    Written(OutputPair),
    /// Nothing to pair (no date, no imagery, no elevation)
    Skipped { reason: String },
    Failed { error: StackError },
}

impl TileOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, TileOutcome::Written(_))
    }
}

/// Counts for a finished batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub discovered: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `.tif` files present in the images directory after the run
    pub images_on_disk: usize,
    /// `.tif` files present in the labels directory after the run
    pub labels_on_disk: usize,
}

impl BatchReport {
    /// Every image on disk has a label and vice versa
    pub fn is_consistent(&self) -> bool {
        self.images_on_disk == self.labels_on_disk
    }

    fn record(&mut self, outcome: &TileOutcome) {
        match outcome {
            TileOutcome::Written(_) => self.written += 1,
            TileOutcome::Skipped { .. } => self.skipped += 1,
            TileOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Drives the per-tile pipeline over every discovered label tile
pub struct BatchDriver {
    config: Config,
    catalog: Box<dyn Catalog>,
    reader: Box<dyn AssetReader>,
    imagery_selector: Box<dyn SceneSelector>,
    elevation_selector: Box<dyn SceneSelector>,
    date_pattern: DatePattern,
    writer: PairWriter,
    pool: rayon::ThreadPool,
}

impl BatchDriver {
    /// Scene selectors start from the configured policies.
    pub fn new(
        config: Config,
        catalog: Box<dyn Catalog>,
        reader: Box<dyn AssetReader>,
    ) -> StackResult<Self> {
        config.validate()?;

        let date_pattern = DatePattern::new(&config.input.date_pattern)?;
        let writer = PairWriter::new(
            config.output.images_dir(),
            config.output.labels_dir(),
            config.output.index_width,
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.processing.threads)
            .build()
            .map_err(|e| StackError::Config(format!("cannot build thread pool: {}", e)))?;

        Ok(Self {
            imagery_selector: config.processing.imagery_selection.selector(),
            elevation_selector: config.processing.elevation_selection.selector(),
            config,
            catalog,
            reader,
            date_pattern,
            writer,
            pool,
        })
    }

    pub fn with_imagery_selector(mut self, selector: Box<dyn SceneSelector>) -> Self {
        self.imagery_selector = selector;
        self
    }

    pub fn with_elevation_selector(mut self, selector: Box<dyn SceneSelector>) -> Self {
        self.elevation_selector = selector;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn writer(&self) -> &PairWriter {
        &self.writer
    }

    /// Create the output directories
    pub fn prepare(&self) -> StackResult<()> {
        self.writer.ensure_dirs()
    }

    /// Label tiles matching the input glob, in sorted path order
    pub fn discover_tiles(&self) -> StackResult<Vec<PathBuf>> {
        let pattern = self.config.input.glob_pattern();
        log::info!("Scanning for label tiles with pattern: {}", pattern);

        let entries = glob::glob(&pattern)
            .map_err(|e| StackError::Config(format!("invalid label pattern '{}': {}", pattern, e)))?;

        let mut tiles = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) => tiles.push(path),
                Err(e) => log::warn!("Unreadable path while scanning tiles: {}", e),
            }
        }
        tiles.sort();

        log::info!("Found {} label tile(s)", tiles.len());
        Ok(tiles)
    }

    /// Run the full pipeline for one tile; never panics on bad input
    pub fn process_tile(&self, index: usize, path: &Path) -> TileOutcome {
        match self.pair_tile(index, path) {
            Ok(pair) => TileOutcome::Written(pair),
            Err(e) if e.is_skip() => TileOutcome::Skipped { reason: e.to_string() },
            Err(error) => TileOutcome::Failed { error },
        }
    }

    fn pair_tile(&self, index: usize, path: &Path) -> StackResult<OutputPair> {
        let catalog_config = &self.config.catalog;

        let geometry = read_label_geometry(path, &self.date_pattern)?;
        let date = geometry
            .acquisition_date
            .ok_or_else(|| StackError::DateParse(path.display().to_string()))?;

        let imagery_request =
            SearchRequest::new(&catalog_config.imagery_collection, &geometry.geographic_bounds)
                .on_day(date);
        let imagery = self
            .imagery_selector
            .select(self.catalog.search(&imagery_request)?);
        if imagery.is_empty() {
            return Err(StackError::EmptyResult {
                collection: catalog_config.imagery_collection.clone(),
            });
        }

        let elevation_request =
            SearchRequest::new(&catalog_config.elevation_collection, &geometry.geographic_bounds);
        let elevation = self
            .elevation_selector
            .select(self.catalog.search(&elevation_request)?);

        let assets = AssetCollection::new(
            imagery,
            elevation,
            &catalog_config.imagery_collection,
            &catalog_config.elevation_collection,
        )?;

        let grid = TargetGrid::new(geometry.bounds, geometry.epsg, self.config.processing.resolution)?;
        let compositor = StackCompositor::new(
            self.reader.as_ref(),
            CompositeParams::from(&self.config.processing),
        );
        let composite = compositor.composite(&assets, &grid)?;

        self.writer.write_pair(index, &composite, &geometry)
    }

    /// Process every discovered tile and report what ended up on disk
    pub fn run(&self) -> StackResult<BatchReport> {
        self.prepare()?;
        let tiles = self.discover_tiles()?;
        let start = Instant::now();

        let mut report = self.pool.install(|| {
            let mut report = BatchReport { discovered: tiles.len(), ..BatchReport::default() };
            for (index, path) in tiles.iter().enumerate() {
                let outcome = self.process_tile(index, path);
                log_outcome(index, path, &outcome);
                report.record(&outcome);
            }
            report
        });

        report.images_on_disk = count_tiffs(self.writer.images_dir())?;
        report.labels_on_disk = count_tiffs(self.writer.labels_dir())?;

        log::info!(
            "Batch finished in {:.1}s: {} discovered, {} written, {} skipped, {} failed",
            start.elapsed().as_secs_f64(),
            report.discovered,
            report.written,
            report.skipped,
            report.failed
        );
        log::info!(
            "{} image(s) and {} label(s) on disk",
            report.images_on_disk,
            report.labels_on_disk
        );
        if !report.is_consistent() {
            log::warn!("Image and label counts differ");
        }

        Ok(report)
    }
}

fn log_outcome(index: usize, path: &Path, outcome: &TileOutcome) {
    match outcome {
        TileOutcome::Written(pair) => {
            log::info!("Processed {}: {} -> {}", index, path.display(), pair.image.display())
        }
        TileOutcome::Skipped { reason } => {
            log::info!("Skipping {}, {}: {}", index, path.display(), reason)
        }
        TileOutcome::Failed { error } => {
            log::error!("Failed {}, {}: {}", index, path.display(), error)
        }
    }
}

/// Visible `.tif` files in `dir`; in-flight temporary files are hidden
fn count_tiffs(dir: &Path) -> StackResult<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with('.') && name.ends_with(".tif") && entry.path().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::stac::StacItem;
    use crate::types::Band;

    struct EmptyCatalog;

    impl Catalog for EmptyCatalog {
        fn search(&self, _request: &SearchRequest) -> StackResult<Vec<StacItem>> {
            Ok(Vec::new())
        }
    }

    struct NoReader;

    impl AssetReader for NoReader {
        fn read_onto(&self, href: &str, _grid: &TargetGrid) -> StackResult<Band> {
            Err(StackError::Read(format!("unexpected read of {}", href)))
        }
    }

    fn driver_in(dir: &Path) -> BatchDriver {
        let mut config = Config::default();
        config.input.base_dir = dir.join("chips");
        config.output.dir = dir.join("out");
        config.processing.threads = 1;
        BatchDriver::new(config, Box::new(EmptyCatalog), Box::new(NoReader)).unwrap()
    }

    #[test]
    fn test_report_consistency() {
        let mut report = BatchReport::default();
        report.record(&TileOutcome::Skipped { reason: "no date".into() });
        report.record(&TileOutcome::Failed { error: StackError::Read("bad".into()) });
        assert_eq!((report.written, report.skipped, report.failed), (0, 1, 1));
        assert!(report.is_consistent());

        report.images_on_disk = 2;
        report.labels_on_disk = 1;
        assert!(!report.is_consistent());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.output.index_width = 0;
        assert!(BatchDriver::new(config, Box::new(EmptyCatalog), Box::new(NoReader)).is_err());
    }

    #[test]
    fn test_discover_tiles_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for chip in ["Spain_2", "Bolivia_1", "India_3"] {
            let scene = dir.path().join("chips").join(chip).join("s1").join("S1A_IW_GRDH_1SDV_20200101");
            std::fs::create_dir_all(&scene).unwrap();
            std::fs::write(scene.join("LabelWater.tif"), b"").unwrap();
            std::fs::write(scene.join("vv.tif"), b"").unwrap();
        }

        let tiles = driver_in(dir.path()).discover_tiles().unwrap();
        let chips: Vec<_> = tiles
            .iter()
            .map(|p| p.strip_prefix(dir.path().join("chips")).unwrap().components().next().unwrap())
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        assert_eq!(chips, ["Bolivia_1", "India_3", "Spain_2"]);
    }

    #[test]
    fn test_count_tiffs_ignores_hidden_and_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0000.tif"), b"").unwrap();
        std::fs::write(dir.path().join(".tmpAbC.tif"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        assert_eq!(count_tiffs(dir.path()).unwrap(), 1);
    }

    #[test]
    fn test_unreadable_tile_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver_in(dir.path());
        driver.prepare().unwrap();

        let bogus = dir.path().join("S1A_IW_GRDH_1SDV_20210815_LabelWater.tif");
        std::fs::write(&bogus, b"garbage").unwrap();

        let outcome = driver.process_tile(0, &bogus);
        assert!(matches!(outcome, TileOutcome::Failed { error: StackError::Read(_) }));
        assert_eq!(count_tiffs(driver.writer().images_dir()).unwrap(), 0);
    }

    #[test]
    fn test_empty_input_runs_clean() {
        let dir = tempfile::tempdir().unwrap();
        let report = driver_in(dir.path()).run().unwrap();
        assert_eq!(report, BatchReport::default());
    }
}
