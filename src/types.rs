use ndarray::{Array3, ArrayView3};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Pixel components handled by the streaming core
pub trait Pixel: Copy + Send + Sync + ToPrimitive + 'static {}

impl<T> Pixel for T where T: Copy + Send + Sync + ToPrimitive + 'static {}

/// Multi-band tile data laid out as (band, row, col)
pub type TileData<T> = Array3<T>;

/// Borrowed view of a tile, handed to accumulators
pub type TileView<'a, T> = ArrayView3<'a, T>;

/// Origin of a region, one signed component per dimension (x = column, y = row)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Index {
    pub x: i64,
    pub y: i64,
}

impl Index {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Extent of a region, one unsigned component per dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub x: u64,
    pub y: u64,
}

impl Size {
    pub const fn new(x: u64, y: u64) -> Self {
        Self { x, y }
    }

    /// A size with any zero component covers no pixel
    pub fn is_empty(&self) -> bool {
        self.x == 0 || self.y == 0
    }

    pub fn number_of_pixels(&self) -> u64 {
        self.x.saturating_mul(self.y)
    }
}

/// Axis-aligned 2D box of raster indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Region {
    pub index: Index,
    pub size: Size,
}

impl Region {
    pub const fn new(index: Index, size: Size) -> Self {
        Self { index, size }
    }

    /// Region starting at (0, 0)
    pub const fn from_size(size: Size) -> Self {
        Self {
            index: Index::new(0, 0),
            size,
        }
    }

    pub fn number_of_pixels(&self) -> u64 {
        self.size.number_of_pixels()
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_empty()
    }

    /// Exclusive upper corner (`index + size`)
    pub fn upper_index(&self) -> Index {
        Index::new(
            self.index.x.saturating_add(self.size.x.min(i64::MAX as u64) as i64),
            self.index.y.saturating_add(self.size.y.min(i64::MAX as u64) as i64),
        )
    }

    /// Check that the region is representable: the upper corner and the
    /// pixel count must not overflow.
    pub fn validate(&self) -> StreamResult<()> {
        for (axis, start, extent) in [("x", self.index.x, self.size.x), ("y", self.index.y, self.size.y)] {
            let extent = i64::try_from(extent).map_err(|_| {
                StreamError::InvalidRegion(format!(
                    "{} extent {} does not fit a signed index",
                    axis, extent
                ))
            })?;
            if start.checked_add(extent).is_none() {
                return Err(StreamError::InvalidRegion(format!(
                    "{} axis overflows: index {} + size {}",
                    axis, start, extent
                )));
            }
        }

        if self.size.x.checked_mul(self.size.y).is_none() {
            return Err(StreamError::InvalidRegion(format!(
                "pixel count of {}x{} overflows",
                self.size.x, self.size.y
            )));
        }

        Ok(())
    }

    /// Containment test for a single index
    pub fn is_inside(&self, index: Index) -> bool {
        let upper = self.upper_index();
        index.x >= self.index.x && index.x < upper.x && index.y >= self.index.y && index.y < upper.y
    }

    /// True when `other` lies entirely within this region. An empty `other`
    /// is contained when its origin lies within the closed bounds.
    pub fn is_inside_region(&self, other: &Region) -> bool {
        let upper = self.upper_index();
        let other_upper = other.upper_index();
        other.index.x >= self.index.x
            && other.index.y >= self.index.y
            && other_upper.x <= upper.x
            && other_upper.y <= upper.y
    }

    /// Intersection with `other`, `None` when they share no pixel
    pub fn crop(&self, other: &Region) -> Option<Region> {
        let upper = self.upper_index();
        let other_upper = other.upper_index();

        let start_x = self.index.x.max(other.index.x);
        let start_y = self.index.y.max(other.index.y);
        let end_x = upper.x.min(other_upper.x);
        let end_y = upper.y.min(other_upper.y);

        if end_x <= start_x || end_y <= start_y {
            return None;
        }

        Some(Region::new(
            Index::new(start_x, start_y),
            Size::new((end_x - start_x) as u64, (end_y - start_y) as u64),
        ))
    }

    /// Shape of the tile array holding this region with `bands` bands
    pub fn tile_shape(&self, bands: usize) -> (usize, usize, usize) {
        (bands, self.size.y as usize, self.size.x as usize)
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}] + [{} x {}]",
            self.index.x, self.index.y, self.size.x, self.size.y
        )
    }
}

/// Error types for tiled streaming
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Split index {index} out of range, only {splits} splits available")]
    IndexOutOfRange { index: usize, splits: usize },

    #[error("Invalid number of requested splits: {0}")]
    InvalidSplitCount(usize),

    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("Upstream pipeline failed to compute region {region}: {source}")]
    UpstreamComputeFailure {
        region: Region,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Streaming cancelled after {completed} of {total} tiles")]
    Cancelled { completed: usize, total: usize },

    #[error("Invalid streaming configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Accumulator error: {0}")]
    Accumulator(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl StreamError {
    /// Runtime conditions (I/O, GDAL, upstream failures, cancellation) as opposed to
    /// setup or programming errors.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StreamError::UpstreamComputeFailure { .. }
                | StreamError::Cancelled { .. }
                | StreamError::Io(_)
                | StreamError::Gdal(_)
        )
    }
}

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;
