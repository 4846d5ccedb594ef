use crate::config::{ProcessingConfig, RatioBand};
use crate::io::raster::AssetReader;
use crate::io::stac::StacItem;
use crate::types::{Band, GeoTransform, StackError, StackResult, TargetGrid};
use ndarray::{Array2, Zip};

/// Imagery and elevation items contributing to one composite
#[derive(Debug, Clone)]
pub struct AssetCollection {
    imagery: Vec<StacItem>,
    elevation: Vec<StacItem>,
}

impl AssetCollection {
    /// Both sides must be non-empty; an empty side is reported against its collection.
    pub fn new(
        imagery: Vec<StacItem>,
        elevation: Vec<StacItem>,
        imagery_collection: &str,
        elevation_collection: &str,
    ) -> StackResult<Self> {
        if imagery.is_empty() {
            return Err(StackError::EmptyResult { collection: imagery_collection.to_string() });
        }
        if elevation.is_empty() {
            return Err(StackError::EmptyResult { collection: elevation_collection.to_string() });
        }
        Ok(Self { imagery, elevation })
    }

    pub fn imagery(&self) -> &[StacItem] {
        &self.imagery
    }

    pub fn elevation(&self) -> &[StacItem] {
        &self.elevation
    }
}

/// One named band of a composite
#[derive(Debug, Clone)]
pub struct NamedBand {
    pub name: String,
    pub data: Band,
}

/// Multi-band float32 raster aligned to a target grid
#[derive(Debug, Clone)]
pub struct CompositeRaster {
    /// Grid (and CRS) every band is stamped with
    pub grid: TargetGrid,
    bands: Vec<NamedBand>,
}

impl CompositeRaster {
    /// Build from bands that all have the grid's shape.
    pub fn new(grid: TargetGrid, bands: Vec<NamedBand>) -> StackResult<Self> {
        let shape = grid.shape();
        for band in &bands {
            if band.data.dim() != shape {
                return Err(StackError::Composition(format!(
                    "band '{}' has shape {:?}, grid expects {:?}",
                    band.name,
                    band.data.dim(),
                    shape
                )));
            }
        }
        Ok(Self { grid, bands })
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.name == name).map(|b| &b.data)
    }

    pub fn bands(&self) -> &[NamedBand] {
        &self.bands
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn epsg(&self) -> u32 {
        self.grid.epsg
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.grid.shape()
    }

    pub fn geo_transform(&self) -> GeoTransform {
        self.grid.geo_transform()
    }
}

/// Band layout of a composite
#[derive(Debug, Clone)]
pub struct CompositeParams {
    /// Asset keys read from every imagery item
    pub imagery_bands: Vec<String>,
    /// Asset key read from the elevation item(s)
    pub elevation_band: String,
    pub ratio: RatioBand,
    /// Bands retained, in output order
    pub output_bands: Vec<String>,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self::from(&ProcessingConfig::default())
    }
}

impl From<&ProcessingConfig> for CompositeParams {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            imagery_bands: config.imagery_bands.clone(),
            elevation_band: config.elevation_band.clone(),
            ratio: config.ratio.clone(),
            output_bands: config.output_bands.clone(),
        }
    }
}

/// NaN-skipping running mean over the time axis
pub struct TemporalMean {
    sum: Array2<f64>,
    count: Array2<u32>,
}

impl TemporalMean {
    pub fn new(shape: (usize, usize)) -> Self {
        Self {
            sum: Array2::zeros(shape),
            count: Array2::zeros(shape),
        }
    }

    pub fn add(&mut self, layer: &Band) {
        Zip::from(&mut self.sum)
            .and(&mut self.count)
            .and(layer)
            .for_each(|sum, count, &value| {
                if !value.is_nan() {
                    *sum += value as f64;
                    *count += 1;
                }
            });
    }

    /// Per-pixel mean; pixels never observed are NaN
    pub fn finish(self) -> Band {
        Zip::from(&self.sum).and(&self.count).map_collect(|&sum, &count| {
            if count == 0 {
                f32::NAN
            } else {
                (sum / count as f64) as f32
            }
        })
    }
}

/// Elementwise `numerator / denominator`; IEEE semantics for zeros
pub fn band_ratio(numerator: &Band, denominator: &Band) -> Band {
    #[cfg(feature = "parallel")]
    {
        Zip::from(numerator).and(denominator).par_map_collect(|&n, &d| n / d)
    }
    #[cfg(not(feature = "parallel"))]
    {
        Zip::from(numerator).and(denominator).map_collect(|&n, &d| n / d)
    }
}

/// Aligns, temporally reduces and derives bands onto a target grid
pub struct StackCompositor<'a> {
    reader: &'a dyn AssetReader,
    params: CompositeParams,
}

impl<'a> StackCompositor<'a> {
    pub fn new(reader: &'a dyn AssetReader, params: CompositeParams) -> Self {
        Self { reader, params }
    }

    pub fn params(&self) -> &CompositeParams {
        &self.params
    }

    /// Build the composite for `assets` on `grid`.
    ///
    /// Imagery bands are averaged across imagery items before the ratio is
    /// taken, so the ratio band is a ratio of means.
    pub fn composite(&self, assets: &AssetCollection, grid: &TargetGrid) -> StackResult<CompositeRaster> {
        let (rows, cols) = grid.shape();
        log::info!(
            "Compositing {} imagery + {} elevation item(s) onto {}x{} grid (EPSG:{}, {} m)",
            assets.imagery().len(),
            assets.elevation().len(),
            cols,
            rows,
            grid.epsg,
            grid.resolution
        );

        let mut stacked: Vec<NamedBand> = Vec::new();

        // Step 1-2: materialise and reduce imagery bands
        for band in &self.params.imagery_bands {
            let data = self.reduce_band(assets.imagery(), band, grid)?.ok_or_else(|| {
                StackError::Composition(format!("no imagery item provides band '{}'", band))
            })?;
            stacked.push(NamedBand { name: band.clone(), data });
        }

        // Elevation has no time axis; a single item passes through unchanged
        let elevation_name = &self.params.elevation_band;
        let elevation = self
            .reduce_band(assets.elevation(), elevation_name, grid)?
            .ok_or_else(|| {
                StackError::Composition(format!(
                    "no elevation item provides band '{}'",
                    elevation_name
                ))
            })?;

        // Step 3: derived ratio, after reduction
        let ratio = &self.params.ratio;
        let ratio_data = {
            let find = |name: &str| {
                stacked.iter().find(|b| b.name == name).map(|b| &b.data).ok_or_else(|| {
                    StackError::Composition(format!("ratio operand '{}' is missing", name))
                })
            };
            band_ratio(find(ratio.numerator.as_str())?, find(ratio.denominator.as_str())?)
        };
        stacked.push(NamedBand { name: elevation_name.clone(), data: elevation });
        stacked.push(NamedBand { name: ratio.name.clone(), data: ratio_data });

        // Step 4: keep exactly the output bands, in output order
        let mut selected = Vec::with_capacity(self.params.output_bands.len());
        for name in &self.params.output_bands {
            let index = stacked.iter().position(|b| &b.name == name).ok_or_else(|| {
                StackError::Composition(format!("output band '{}' was not produced", name))
            })?;
            selected.push(stacked.swap_remove(index));
        }

        // Step 5: stamp the grid's CRS
        CompositeRaster::new(*grid, selected)
    }

    /// Mean of `band` across the items that carry it; `None` if none does.
    fn reduce_band(&self, items: &[StacItem], band: &str, grid: &TargetGrid) -> StackResult<Option<Band>> {
        let mut mean = TemporalMean::new(grid.shape());
        let mut contributors = 0;

        for item in items {
            let Some(asset) = item.asset(band) else {
                log::warn!("Item {} has no '{}' asset", item.id, band);
                continue;
            };

            let layer = self.reader.read_onto(&asset.href, grid)?;
            if layer.dim() != grid.shape() {
                return Err(StackError::Composition(format!(
                    "asset '{}' of {} resampled to {:?}, grid expects {:?}",
                    band,
                    item.id,
                    layer.dim(),
                    grid.shape()
                )));
            }
            mean.add(&layer);
            contributors += 1;
        }

        if contributors == 0 {
            return Ok(None);
        }
        log::debug!("Band '{}' reduced over {} item(s)", band, contributors);
        Ok(Some(mean.finish()))
    }
}
