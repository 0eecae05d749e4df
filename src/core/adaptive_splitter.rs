use crate::core::splitter::{ceil_sqrt, check_request, RegionSplitter, SplitLayout};
use crate::types::{Region, Size, StreamResult};

/// Tile-hint driven region splitter.
///
/// The region is covered by a grid of hint-sized tiles anchored at the
/// region origin, the last column and row truncated at the boundary. When
/// that grid has no more tiles than requested, each tile is a split: the
/// splitter never cuts tiles smaller than the hint to reach the requested
/// count. When it has more, neighbouring tiles are grouped into larger
/// blocks until the count fits.
///
/// A zero hint component means "no preference" along that axis and is
/// replaced by a size derived from the requested count.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveSplitter {
    tile_hint: Size,
}

impl AdaptiveSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tile_hint(tile_hint: Size) -> Self {
        Self { tile_hint }
    }

    pub fn set_tile_hint(&mut self, tile_hint: Size) {
        self.tile_hint = tile_hint;
    }

    pub fn tile_hint(&self) -> Size {
        self.tile_hint
    }

    /// Hint actually used for `region`, with zero components filled in and
    /// every component clamped to `[1, extent]`.
    pub fn effective_tile_hint(&self, region: &Region, requested: usize) -> Size {
        let size = region.size;
        let requested = requested.max(1) as u64;

        let (hint_x, hint_y) = match (self.tile_hint.x, self.tile_hint.y) {
            (0, 0) => {
                let side = ceil_sqrt(size.number_of_pixels().div_ceil(requested));
                (side, side)
            }
            (0, hint_y) => {
                let hint_y = hint_y.clamp(1, size.y.max(1));
                let per_row = requested.div_ceil(size.y.div_ceil(hint_y).max(1));
                (size.x.div_ceil(per_row.max(1)), hint_y)
            }
            (hint_x, 0) => {
                let hint_x = hint_x.clamp(1, size.x.max(1));
                let per_column = requested.div_ceil(size.x.div_ceil(hint_x).max(1));
                (hint_x, size.y.div_ceil(per_column.max(1)))
            }
            (hint_x, hint_y) => (hint_x, hint_y),
        };

        Size::new(hint_x.clamp(1, size.x.max(1)), hint_y.clamp(1, size.y.max(1)))
    }
}

impl RegionSplitter for AdaptiveSplitter {
    fn layout(&self, region: &Region, requested: usize) -> StreamResult<SplitLayout> {
        check_request(region, requested)?;
        if region.is_empty() || requested == 1 {
            return Ok(SplitLayout::whole(region));
        }

        let hint = self.effective_tile_hint(region, requested);
        let tiles_x = region.size.x.div_ceil(hint.x);
        let tiles_y = region.size.y.div_ceil(hint.y);
        let requested = requested as u64;

        if tiles_x.saturating_mul(tiles_y) <= requested {
            return Ok(SplitLayout::grid(region, hint));
        }

        // Group tiles, growing the axis with more remaining groups (x on ties)
        let (mut group_x, mut group_y) = (1u64, 1u64);
        loop {
            let columns = tiles_x.div_ceil(group_x);
            let rows = tiles_y.div_ceil(group_y);
            if columns.saturating_mul(rows) <= requested {
                break;
            }
            if (columns >= rows && group_x < tiles_x) || group_y >= tiles_y {
                group_x += 1;
            } else {
                group_y += 1;
            }
        }

        Ok(SplitLayout::grid(
            region,
            Size::new(group_x * hint.x, group_y * hint.y),
        ))
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }
}
