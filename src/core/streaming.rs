use crate::core::adaptive_splitter::AdaptiveSplitter;
use crate::core::splitter::{RegionSplitter, SquareTileSplitter, StripSplitter};
use crate::types::{Region, Size, StreamError, StreamResult};
use serde::{Deserialize, Serialize};

/// Bytes in one megabyte of the RAM budget
const MEGABYTE: f64 = 1024.0 * 1024.0;

/// Smallest square tile side used by `StreamingMode::TileDimension`
const MIN_TILE_DIMENSION: u64 = 16;

/// How a region is divided for streaming
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StreamingMode {
    /// Tile-hint aligned tiles, count driven by the RAM budget
    Adaptive { available_ram_mb: u64, bias: f64 },
    /// Square tiles, count driven by the RAM budget
    TiledRam { available_ram_mb: u64, bias: f64 },
    /// Full-width strips, count driven by the RAM budget
    StrippedRam { available_ram_mb: u64, bias: f64 },
    /// Square tiles, fixed number of divisions
    TiledDivisions(usize),
    /// Full-width strips, fixed number of divisions
    StrippedDivisions(usize),
    /// Square tiles of the given side (at least 16 pixels)
    TileDimension(u64),
    /// Full-width strips of the given number of lines
    StripLines(u64),
}

impl Default for StreamingMode {
    fn default() -> Self {
        StreamingMode::Adaptive {
            available_ram_mb: 0, // Use the configured default budget
            bias: 1.0,
        }
    }
}

/// Streaming configuration, passed explicitly to the decorator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Splitting strategy
    pub mode: StreamingMode,
    /// RAM budget in MB used when a mode asks for 0 MB
    pub default_ram_mb: u64,
    /// Tile hint taking precedence over the pipeline's own hint
    pub tile_hint: Option<Size>,
    /// Side alignment of square tiles
    pub tile_alignment: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            mode: StreamingMode::default(),
            default_ram_mb: 256,
            tile_hint: None,
            tile_alignment: 16,
        }
    }
}

impl StreamingConfig {
    /// Environment variable overriding `default_ram_mb`
    pub const RAM_HINT_ENV: &'static str = "TILESTREAM_MAX_RAM_HINT";

    /// Default configuration with the RAM budget taken from
    /// `TILESTREAM_MAX_RAM_HINT` when it holds a positive number of MB
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(Self::RAM_HINT_ENV) {
            match value.trim().parse::<u64>() {
                Ok(ram_mb) if ram_mb > 0 => {
                    log::debug!("Using {} MB RAM budget from {}", ram_mb, Self::RAM_HINT_ENV);
                    config.default_ram_mb = ram_mb;
                }
                _ => log::warn!(
                    "Ignoring invalid {} value '{}', using {} MB",
                    Self::RAM_HINT_ENV,
                    value,
                    config.default_ram_mb
                ),
            }
        }

        config
    }

    pub fn with_mode(mut self, mode: StreamingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_tile_hint(mut self, tile_hint: Size) -> Self {
        self.tile_hint = Some(tile_hint);
        self
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.default_ram_mb == 0 {
            return Err(StreamError::InvalidConfiguration(
                "default RAM budget must be positive".to_string(),
            ));
        }
        if self.tile_alignment == 0 {
            return Err(StreamError::InvalidConfiguration(
                "tile alignment must be positive".to_string(),
            ));
        }

        match self.mode {
            StreamingMode::Adaptive { bias, .. }
            | StreamingMode::TiledRam { bias, .. }
            | StreamingMode::StrippedRam { bias, .. } => {
                if !bias.is_finite() || bias <= 0.0 {
                    return Err(StreamError::InvalidConfiguration(format!(
                        "memory bias must be a positive number, got {}",
                        bias
                    )));
                }
            }
            StreamingMode::TiledDivisions(0) | StreamingMode::StrippedDivisions(0) => {
                return Err(StreamError::InvalidConfiguration(
                    "number of divisions must be positive".to_string(),
                ));
            }
            StreamingMode::TileDimension(0) => {
                return Err(StreamError::InvalidConfiguration(
                    "tile dimension must be positive".to_string(),
                ));
            }
            StreamingMode::StripLines(0) => {
                return Err(StreamError::InvalidConfiguration(
                    "number of lines per strip must be positive".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }
}

/// Partition chosen for one streaming pass
#[derive(Debug)]
pub struct StreamingPlan {
    splitter: Box<dyn RegionSplitter>,
    region: Region,
    requested: usize,
    splits: usize,
}

impl StreamingPlan {
    pub fn region(&self) -> Region {
        self.region
    }

    /// Number of divisions asked from the splitter
    pub fn requested_splits(&self) -> usize {
        self.requested
    }

    /// Number of pieces actually produced
    pub fn splits(&self) -> usize {
        self.splits
    }

    pub fn splitter(&self) -> &dyn RegionSplitter {
        self.splitter.as_ref()
    }

    pub fn split(&self, i: usize) -> StreamResult<Region> {
        self.splitter.split(i, self.requested, &self.region)
    }

    /// All pieces in processing order
    pub fn regions(&self) -> impl Iterator<Item = StreamResult<Region>> + '_ {
        (0..self.splits).map(move |i| self.split(i))
    }
}

/// Chooses the splitter and the number of divisions for a region
#[derive(Debug, Clone, Default)]
pub struct StreamingManager {
    config: StreamingConfig,
}

impl StreamingManager {
    pub fn new(config: StreamingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Number of divisions keeping each piece within the RAM budget
    pub fn estimate_divisions(
        &self,
        region: &Region,
        bands: usize,
        bytes_per_component: usize,
        available_ram_mb: u64,
        bias: f64,
    ) -> usize {
        let ram_mb = if available_ram_mb == 0 {
            self.config.default_ram_mb
        } else {
            available_ram_mb
        };

        let pixels = region.number_of_pixels();
        if pixels == 0 {
            return 1;
        }

        let memory = pixels as f64 * bands.max(1) as f64 * bytes_per_component as f64 * bias;
        let budget = ram_mb.max(1) as f64 * MEGABYTE;
        let divisions = (memory / budget).ceil();

        log::debug!(
            "Estimated {:.1} MB for {} ({} bands), budget {} MB -> {} divisions",
            memory / MEGABYTE,
            region,
            bands,
            ram_mb,
            divisions
        );

        (divisions as u64).clamp(1, pixels) as usize
    }

    /// Build the streaming plan for `region`
    pub fn prepare(
        &self,
        region: &Region,
        bands: usize,
        bytes_per_component: usize,
        pipeline_tile_hint: Option<Size>,
    ) -> StreamResult<StreamingPlan> {
        self.config.validate()?;
        region.validate()?;

        let (splitter, requested): (Box<dyn RegionSplitter>, usize) = match self.config.mode {
            StreamingMode::Adaptive { available_ram_mb, bias } => {
                let hint = self
                    .config
                    .tile_hint
                    .or(pipeline_tile_hint)
                    .unwrap_or_default();
                log::debug!("Adaptive streaming with tile hint {}x{}", hint.x, hint.y);
                (
                    Box::new(AdaptiveSplitter::with_tile_hint(hint)),
                    self.estimate_divisions(region, bands, bytes_per_component, available_ram_mb, bias),
                )
            }
            StreamingMode::TiledRam { available_ram_mb, bias } => (
                Box::new(SquareTileSplitter::with_alignment(self.config.tile_alignment)),
                self.estimate_divisions(region, bands, bytes_per_component, available_ram_mb, bias),
            ),
            StreamingMode::StrippedRam { available_ram_mb, bias } => (
                Box::new(StripSplitter::new()),
                self.estimate_divisions(region, bands, bytes_per_component, available_ram_mb, bias),
            ),
            StreamingMode::TiledDivisions(divisions) => (
                Box::new(SquareTileSplitter::with_alignment(self.config.tile_alignment)),
                divisions,
            ),
            StreamingMode::StrippedDivisions(divisions) => (Box::new(StripSplitter::new()), divisions),
            StreamingMode::TileDimension(dimension) => {
                let dimension = dimension.max(MIN_TILE_DIMENSION);
                let tiles = region
                    .number_of_pixels()
                    .div_ceil(dimension.saturating_mul(dimension))
                    .max(1);
                (
                    Box::new(SquareTileSplitter::with_alignment(dimension)),
                    tiles as usize,
                )
            }
            StreamingMode::StripLines(lines) => {
                let strips = region.size.y.div_ceil(lines).max(1);
                (Box::new(StripSplitter::new()), strips as usize)
            }
        };

        let splits = splitter.number_of_splits(region, requested)?;
        if splits != requested {
            log::debug!(
                "{} splitter produced {} splits for {} requested",
                splitter.name(),
                splits,
                requested
            );
        }

        log::info!(
            "Streaming {} in {} pieces ({} splitter)",
            region,
            splits,
            splitter.name()
        );

        Ok(StreamingPlan {
            splitter,
            region: *region,
            requested,
            splits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Index;

    #[test]
    fn test_default_config() {
        let config = StreamingConfig::default();
        assert_eq!(config.default_ram_mb, 256);
        assert_eq!(config.tile_alignment, 16);
        assert!(config.validate().is_ok());
        assert!(matches!(config.mode, StreamingMode::Adaptive { available_ram_mb: 0, .. }));
    }

    #[test]
    fn test_invalid_config() {
        let config = StreamingConfig::default().with_mode(StreamingMode::StripLines(0));
        assert!(matches!(config.validate(), Err(StreamError::InvalidConfiguration(_))));

        let config = StreamingConfig::default().with_mode(StreamingMode::Adaptive {
            available_ram_mb: 10,
            bias: -1.0,
        });
        assert!(matches!(config.validate(), Err(StreamError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_ram_estimate() {
        let manager = StreamingManager::new(StreamingConfig::default());
        // 2048 x 2048 x 4 bands x 4 bytes = 64 MB
        let region = Region::from_size(Size::new(2048, 2048));

        assert_eq!(manager.estimate_divisions(&region, 4, 4, 16, 1.0), 4);
        assert_eq!(manager.estimate_divisions(&region, 4, 4, 16, 2.0), 8);
        // 0 MB falls back to the 256 MB default
        assert_eq!(manager.estimate_divisions(&region, 4, 4, 0, 1.0), 1);
        assert_eq!(manager.estimate_divisions(&Region::default(), 4, 4, 1, 1.0), 1);
    }

    #[test]
    fn test_prepare_strip_lines() {
        let config = StreamingConfig::default().with_mode(StreamingMode::StripLines(10));
        let manager = StreamingManager::new(config);
        let region = Region::new(Index::new(0, 0), Size::new(30, 95));

        let plan = manager.prepare(&region, 1, 4, None).unwrap();
        assert_eq!(plan.requested_splits(), 10);
        assert_eq!(plan.splits(), 10);
        assert_eq!(plan.split(9).unwrap().size, Size::new(30, 5));
    }

    #[test]
    fn test_prepare_tile_dimension() {
        let config = StreamingConfig::default().with_mode(StreamingMode::TileDimension(32));
        let manager = StreamingManager::new(config);
        let region = Region::from_size(Size::new(100, 64));

        let plan = manager.prepare(&region, 1, 4, None).unwrap();
        assert_eq!(plan.splits(), 8);
        assert_eq!(plan.split(0).unwrap().size, Size::new(32, 32));
        assert_eq!(plan.split(3).unwrap().size, Size::new(4, 32));
    }

    #[test]
    fn test_prepare_huge_tile_dimension() {
        let config = StreamingConfig::default().with_mode(StreamingMode::TileDimension(5_000_000_000));
        assert!(config.validate().is_ok());

        let manager = StreamingManager::new(config);
        let region = Region::from_size(Size::new(100, 100));

        let plan = manager.prepare(&region, 1, 4, None).unwrap();
        assert_eq!(plan.requested_splits(), 1);
        assert_eq!(plan.splits(), 1);
        assert_eq!(plan.split(0).unwrap(), region);
    }

    #[test]
    fn test_config_hint_overrides_pipeline_hint() {
        let config = StreamingConfig::default()
            .with_mode(StreamingMode::Adaptive {
                available_ram_mb: 1,
                bias: 1.0,
            })
            .with_tile_hint(Size::new(256, 256));
        let manager = StreamingManager::new(config);
        // 1024 x 1024 x 4 bytes = 4 MB -> 4 divisions of 256x256 hint tiles
        let region = Region::from_size(Size::new(1024, 1024));

        let plan = manager
            .prepare(&region, 1, 4, Some(Size::new(64, 64)))
            .unwrap();
        assert_eq!(plan.requested_splits(), 4);
        assert_eq!(plan.splits(), 4);
        assert_eq!(plan.split(0).unwrap().size, Size::new(512, 512));
    }
}
