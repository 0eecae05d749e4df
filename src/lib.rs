//! tilestream: memory-bounded tiled streaming of large rasters
//!
//! A raster pipeline too large to compute at once is divided into tiles by a
//! [`RegionSplitter`], each tile is computed on demand and folded into a
//! persistent [`Accumulator`] by the [`PersistentStreamingDecorator`].
//! The [`AdaptiveSplitter`] aligns tiles on the storage tile hint so that no
//! stored block is read twice.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{Index, Pixel, Region, Size, StreamError, StreamResult, TileData, TileView};

pub use crate::core::{
    Accumulator, AdaptiveSplitter, CancellationToken, DecoratorState, Histogram, ImageStatistics,
    PersistentStreamingDecorator, Pipeline, PixelSum, RegionSplitter, SquareTileSplitter,
    StatisticsParams, StreamingConfig, StreamingHistogram, StreamingManager, StreamingMode,
    StreamingPlan, StreamingReport, StreamingStatistics, StripSplitter, UnaryFunctorFilter,
};

pub use io::{GdalRasterSource, GdalRasterWriter, InMemorySource};
