//! Core tiling and streaming modules

pub mod splitter;
pub mod adaptive_splitter;
pub mod streaming;
pub mod pipeline;
pub mod decorator;
pub mod statistics;
pub mod histogram;
pub mod sum;

// Re-export main types
pub use splitter::{RegionSplitter, SplitLayout, SquareTileSplitter, StripSplitter};
pub use adaptive_splitter::AdaptiveSplitter;
pub use streaming::{StreamingConfig, StreamingManager, StreamingMode, StreamingPlan};
pub use pipeline::{Accumulator, CancellationToken, Pipeline, UnaryFunctorFilter};
pub use decorator::{DecoratorState, PersistentStreamingDecorator, StateObserver, StreamingReport};
pub use statistics::{ImageStatistics, StatisticsParams, StreamingStatistics};
pub use histogram::{Histogram, StreamingHistogram};
pub use sum::PixelSum;
