use crate::types::{Index, Region, Size, StreamError, StreamResult};

/// Regular grid of pieces covering a region, numbered row-major (x fastest).
///
/// Every piece has size `piece` except the last column/row, which is
/// truncated at the region boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitLayout {
    /// Size of a full (non-truncated) piece
    pub piece: Size,
    /// Number of pieces along x
    pub columns: u64,
    /// Number of pieces along y
    pub rows: u64,
}

impl SplitLayout {
    /// Layout made of the region itself
    pub fn whole(region: &Region) -> Self {
        Self {
            piece: region.size,
            columns: 1,
            rows: 1,
        }
    }

    /// Grid of `piece`-sized blocks covering `region`
    pub fn grid(region: &Region, piece: Size) -> Self {
        let piece = Size::new(piece.x.max(1), piece.y.max(1));
        Self {
            piece,
            columns: region.size.x.div_ceil(piece.x).max(1),
            rows: region.size.y.div_ceil(piece.y).max(1),
        }
    }

    pub fn count(&self) -> usize {
        (self.columns * self.rows) as usize
    }

    /// The `i`-th piece of `region`
    pub fn piece(&self, region: &Region, i: usize) -> StreamResult<Region> {
        let splits = self.count();
        if i >= splits {
            return Err(StreamError::IndexOutOfRange { index: i, splits });
        }

        let column = i as u64 % self.columns;
        let row = i as u64 / self.columns;

        let start_x = column * self.piece.x;
        let start_y = row * self.piece.y;
        let width = self.piece.x.min(region.size.x.saturating_sub(start_x));
        let height = self.piece.y.min(region.size.y.saturating_sub(start_y));

        Ok(Region::new(
            Index::new(
                region.index.x + start_x as i64,
                region.index.y + start_y as i64,
            ),
            Size::new(width, height),
        ))
    }
}

/// Capability to partition a region into disjoint pieces covering it exactly.
///
/// Implementations hold configuration only: the same `(region, requested)`
/// pair always yields the same partition.
pub trait RegionSplitter: std::fmt::Debug + Send + Sync {
    /// Compute the partition grid for `region` and `requested` splits
    fn layout(&self, region: &Region, requested: usize) -> StreamResult<SplitLayout>;

    /// Short name used in log output
    fn name(&self) -> &'static str;

    /// Number of pieces `region` is actually divided into
    fn number_of_splits(&self, region: &Region, requested: usize) -> StreamResult<usize> {
        Ok(self.layout(region, requested)?.count())
    }

    /// The `i`-th piece (0-indexed) of the partition of `region`
    fn split(&self, i: usize, requested: usize, region: &Region) -> StreamResult<Region> {
        self.layout(region, requested)?.piece(region, i)
    }
}

/// Common preconditions of every splitter
pub(crate) fn check_request(region: &Region, requested: usize) -> StreamResult<()> {
    if requested == 0 {
        return Err(StreamError::InvalidSplitCount(requested));
    }
    region.validate()
}

/// Smallest `s` with `s * s >= value`
pub(crate) fn ceil_sqrt(value: u64) -> u64 {
    let mut s = (value as f64).sqrt() as u64;
    while s.saturating_mul(s) < value {
        s += 1;
    }
    while s > 0 && (s - 1).saturating_mul(s - 1) >= value {
        s -= 1;
    }
    s
}

/// Horizontal strips along the outermost axis (rows), or along x when the
/// region is a single row.
#[derive(Debug, Clone, Copy, Default)]
pub struct StripSplitter;

impl StripSplitter {
    pub fn new() -> Self {
        Self
    }
}

impl RegionSplitter for StripSplitter {
    fn layout(&self, region: &Region, requested: usize) -> StreamResult<SplitLayout> {
        check_request(region, requested)?;
        if region.is_empty() || requested == 1 {
            return Ok(SplitLayout::whole(region));
        }

        let requested = requested as u64;
        if region.size.y > 1 {
            let lines = region.size.y.div_ceil(requested);
            Ok(SplitLayout::grid(region, Size::new(region.size.x, lines)))
        } else {
            let columns = region.size.x.div_ceil(requested);
            Ok(SplitLayout::grid(region, Size::new(columns, region.size.y)))
        }
    }

    fn name(&self) -> &'static str {
        "strip"
    }
}

/// Square tiles whose side is a multiple of the tile alignment.
///
/// The number of pieces follows from the tile side, so it may exceed the
/// requested count on small regions.
#[derive(Debug, Clone, Copy)]
pub struct SquareTileSplitter {
    alignment: u64,
}

impl Default for SquareTileSplitter {
    fn default() -> Self {
        Self { alignment: 16 }
    }
}

impl SquareTileSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alignment(alignment: u64) -> Self {
        Self {
            alignment: alignment.max(1),
        }
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Side of the square tile used for `requested` splits of `region`
    pub fn tile_side(&self, region: &Region, requested: usize) -> u64 {
        let pixels_per_split = region.number_of_pixels().div_ceil(requested.max(1) as u64);
        let side = ceil_sqrt(pixels_per_split).max(1);
        side.div_ceil(self.alignment).saturating_mul(self.alignment)
    }
}

impl RegionSplitter for SquareTileSplitter {
    fn layout(&self, region: &Region, requested: usize) -> StreamResult<SplitLayout> {
        check_request(region, requested)?;
        if region.is_empty() || requested == 1 {
            return Ok(SplitLayout::whole(region));
        }

        let side = self.tile_side(region, requested);
        Ok(SplitLayout::grid(region, Size::new(side, side)))
    }

    fn name(&self) -> &'static str {
        "square-tile"
    }
}
