//! Configuration for the pairing pipeline.
//!
//! Every path, collection name and processing parameter the batch needs lives
//! here, so a run is fully described by one file and tests can point the
//! driver at temporary directories.

use crate::core::selection::SelectionPolicy;
use crate::io::raster::ResamplingMethod;
use crate::types::{StackError, StackResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Where label tiles are discovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Root directory of the label chips
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Glob pattern, relative to `base_dir`, matching every label tile
    #[serde(default = "default_label_pattern")]
    pub label_pattern: String,

    /// Regex with one capture group holding the 8-digit acquisition date
    #[serde(default = "default_date_pattern")]
    pub date_pattern: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            label_pattern: default_label_pattern(),
            date_pattern: default_date_pattern(),
        }
    }
}

impl InputConfig {
    /// Full glob expression for tile discovery
    pub fn glob_pattern(&self) -> String {
        self.base_dir.join(&self.label_pattern).to_string_lossy().into_owned()
    }
}

/// Where image/label pairs are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_images_subdir")]
    pub images_subdir: String,

    #[serde(default = "default_labels_subdir")]
    pub labels_subdir: String,

    /// Zero-padding width of the numeric file stem (4 gives `0000.tif`)
    #[serde(default = "default_index_width")]
    pub index_width: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            images_subdir: default_images_subdir(),
            labels_subdir: default_labels_subdir(),
            index_width: default_index_width(),
        }
    }
}

impl OutputConfig {
    pub fn images_dir(&self) -> PathBuf {
        self.dir.join(&self.images_subdir)
    }

    pub fn labels_dir(&self) -> PathBuf {
        self.dir.join(&self.labels_subdir)
    }
}

/// How asset hrefs are authorised before pixel access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningMode {
    PlanetaryComputer,
    None,
}

/// Remote STAC catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// STAC API root (the `/search` suffix is added when missing)
    #[serde(default = "default_catalog_url")]
    pub url: String,

    #[serde(default = "default_signing")]
    pub signing: SigningMode,

    /// SAS token endpoint used when `signing` is `planetary-computer`
    #[serde(default = "default_sas_url")]
    pub sas_url: String,

    #[serde(default = "default_imagery_collection")]
    pub imagery_collection: String,

    #[serde(default = "default_elevation_collection")]
    pub elevation_collection: String,

    /// Items requested per search page
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Upper bound on items collected across pages
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: default_catalog_url(),
            signing: default_signing(),
            sas_url: default_sas_url(),
            imagery_collection: default_imagery_collection(),
            elevation_collection: default_elevation_collection(),
            page_limit: default_page_limit(),
            max_items: default_max_items(),
        }
    }
}

/// Derived ratio band `numerator / denominator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioBand {
    pub name: String,
    pub numerator: String,
    pub denominator: String,
}

impl Default for RatioBand {
    fn default() -> Self {
        Self {
            name: "vv_vh".to_string(),
            numerator: "vv".to_string(),
            denominator: "vh".to_string(),
        }
    }
}

/// Compositing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Output pixel size in target CRS units
    #[serde(default = "default_resolution")]
    pub resolution: f64,

    /// Asset keys read from every imagery item
    #[serde(default = "default_imagery_bands")]
    pub imagery_bands: Vec<String>,

    /// Asset key read from the elevation item
    #[serde(default = "default_elevation_band")]
    pub elevation_band: String,

    #[serde(default)]
    pub ratio: RatioBand,

    /// Bands kept in the written image, in file order
    #[serde(default = "default_output_bands")]
    pub output_bands: Vec<String>,

    #[serde(default)]
    pub resampling: ResamplingMethod,

    #[serde(default)]
    pub imagery_selection: SelectionPolicy,

    #[serde(default)]
    pub elevation_selection: SelectionPolicy,

    /// Rayon threads for array evaluation (0 uses the rayon default)
    #[serde(default)]
    pub threads: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            imagery_bands: default_imagery_bands(),
            elevation_band: default_elevation_band(),
            ratio: RatioBand::default(),
            output_bands: default_output_bands(),
            resampling: ResamplingMethod::default(),
            imagery_selection: SelectionPolicy::default(),
            elevation_selection: SelectionPolicy::default(),
            threads: 0,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is picked from the extension; anything other than `.json` is YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> StackResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StackError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents)?,
            _ => Self::from_yaml(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> StackResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| StackError::Config(format!("invalid YAML: {}", e)))
    }

    pub fn from_json(json: &str) -> StackResult<Self> {
        serde_json::from_str(json).map_err(|e| StackError::Config(format!("invalid JSON: {}", e)))
    }

    pub fn to_yaml(&self) -> StackResult<String> {
        serde_yaml::to_string(self).map_err(|e| StackError::Config(e.to_string()))
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> StackResult<()> {
        let p = &self.processing;

        if !(p.resolution.is_finite() && p.resolution > 0.0) {
            return Err(StackError::Config(format!(
                "resolution must be positive, got {}",
                p.resolution
            )));
        }
        if p.imagery_bands.is_empty() {
            return Err(StackError::Config("imagery_bands must not be empty".into()));
        }
        if p.output_bands.is_empty() {
            return Err(StackError::Config("output_bands must not be empty".into()));
        }
        if self.output.index_width == 0 {
            return Err(StackError::Config("index_width must be > 0".into()));
        }
        if self.output.images_subdir == self.output.labels_subdir {
            return Err(StackError::Config(
                "images_subdir and labels_subdir must differ".into(),
            ));
        }

        let catalog = &self.catalog;
        if catalog.page_limit == 0 {
            return Err(StackError::Config("catalog.page_limit must be > 0".into()));
        }
        if catalog.max_items == 0 {
            return Err(StackError::Config("catalog.max_items must be > 0".into()));
        }

        if p.imagery_bands.contains(&p.ratio.name) || p.ratio.name == p.elevation_band {
            return Err(StackError::Config(format!(
                "ratio name '{}' collides with an input band",
                p.ratio.name
            )));
        }
        for operand in [&p.ratio.numerator, &p.ratio.denominator] {
            if !p.imagery_bands.contains(operand) {
                return Err(StackError::Config(format!(
                    "ratio operand '{}' is not an imagery band",
                    operand
                )));
            }
        }

        for band in &p.output_bands {
            let produced = p.imagery_bands.contains(band)
                || *band == p.elevation_band
                || *band == p.ratio.name;
            if !produced {
                return Err(StackError::Config(format!(
                    "output band '{}' is never produced",
                    band
                )));
            }
        }

        regex::Regex::new(&self.input.date_pattern)
            .map_err(|e| StackError::Config(format!("invalid date_pattern: {}", e)))?;

        Ok(())
    }
}

// Default value functions for serde
fn default_base_dir() -> PathBuf { PathBuf::from("chips") }
fn default_label_pattern() -> String { "*/s1/*/LabelWater.tif".to_string() }
fn default_date_pattern() -> String { crate::io::label::DEFAULT_DATE_PATTERN.to_string() }
fn default_output_dir() -> PathBuf { PathBuf::from(".") }
fn default_images_subdir() -> String { "images".to_string() }
fn default_labels_subdir() -> String { "labels".to_string() }
fn default_index_width() -> usize { 4 }
fn default_catalog_url() -> String { "https://planetarycomputer.microsoft.com/api/stac/v1".to_string() }
fn default_signing() -> SigningMode { SigningMode::PlanetaryComputer }
fn default_sas_url() -> String { "https://planetarycomputer.microsoft.com/api/sas/v1".to_string() }
fn default_imagery_collection() -> String { "sentinel-1-rtc".to_string() }
fn default_elevation_collection() -> String { "nasadem".to_string() }
fn default_page_limit() -> u32 { 100 }
fn default_max_items() -> usize { 100 }
fn default_resolution() -> f64 { 10.0 }
fn default_imagery_bands() -> Vec<String> { vec!["vv".to_string(), "vh".to_string()] }
fn default_elevation_band() -> String { "elevation".to_string() }
fn default_output_bands() -> Vec<String> {
    ["vv", "vh", "vv_vh", "elevation"].iter().map(|s| s.to_string()).collect()
}

/// Commented template written by `floodstack generate-config`.
pub const CONFIG_TEMPLATE: &str = r#"# floodstack pipeline configuration

input:
  # Root directory of the label chips
  base_dir: chips
  # Glob relative to base_dir matching every label tile
  label_pattern: "*/s1/*/LabelWater.tif"
  # One capture group with the 8-digit acquisition date
  date_pattern: 'S1[AB]_IW_GRDH_1SDV_(\d{8})'

output:
  dir: .
  images_subdir: images
  labels_subdir: labels
  index_width: 4

catalog:
  url: https://planetarycomputer.microsoft.com/api/stac/v1
  # planetary-computer | none
  signing: planetary-computer
  sas_url: https://planetarycomputer.microsoft.com/api/sas/v1
  imagery_collection: sentinel-1-rtc
  elevation_collection: nasadem
  page_limit: 100
  max_items: 100

processing:
  resolution: 10.0
  imagery_bands: [vv, vh]
  elevation_band: elevation
  ratio:
    name: vv_vh
    numerator: vv
    denominator: vh
  output_bands: [vv, vh, vv_vh, elevation]
  # nearest | bilinear
  resampling: nearest
  # first | all
  imagery_selection: first
  elevation_selection: first
  # 0 uses one thread per core
  threads: 0
"#;
