use crate::core::pipeline::Pipeline;
use crate::types::{Index, Pixel, Region, Size, StreamError, StreamResult, TileData};
use ndarray::{s, Array3};

/// Pipeline source serving tiles out of an array held in memory
#[derive(Debug, Clone)]
pub struct InMemorySource<T> {
    data: Array3<T>,
    origin: Index,
    tile_hint: Option<Size>,
    requested: Option<Region>,
    request_count: usize,
    compute_count: usize,
}

impl<T: Pixel> InMemorySource<T> {
    /// Source over `data` laid out as (band, row, col), origin at (0, 0)
    pub fn new(data: Array3<T>) -> Self {
        Self {
            data,
            origin: Index::default(),
            tile_hint: None,
            requested: None,
            request_count: 0,
            compute_count: 0,
        }
    }

    pub fn with_origin(mut self, origin: Index) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_tile_hint(mut self, tile_hint: Size) -> Self {
        self.tile_hint = Some(tile_hint);
        self
    }

    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    /// Number of regions requested so far
    pub fn request_count(&self) -> usize {
        self.request_count
    }

    /// Number of tiles computed so far
    pub fn compute_count(&self) -> usize {
        self.compute_count
    }
}

impl<T: Pixel> Pipeline for InMemorySource<T> {
    type Pixel = T;

    fn largest_possible_region(&self) -> Region {
        let (_, rows, cols) = self.data.dim();
        Region::new(self.origin, Size::new(cols as u64, rows as u64))
    }

    fn number_of_bands(&self) -> usize {
        self.data.len_of(ndarray::Axis(0))
    }

    fn tile_hint(&self) -> Option<Size> {
        self.tile_hint
    }

    fn request_region(&mut self, region: Region) -> StreamResult<()> {
        let largest = self.largest_possible_region();
        if !largest.is_inside_region(&region) {
            return Err(StreamError::InvalidRegion(format!(
                "requested {} outside of {}",
                region, largest
            )));
        }
        self.requested = Some(region);
        self.request_count += 1;
        Ok(())
    }

    fn compute_requested_region(&mut self) -> StreamResult<TileData<T>> {
        let region = self.requested.ok_or_else(|| {
            StreamError::InvalidRegion("no region requested before compute".to_string())
        })?;

        let row0 = (region.index.y - self.origin.y) as usize;
        let col0 = (region.index.x - self.origin.x) as usize;
        let rows = region.size.y as usize;
        let cols = region.size.x as usize;

        self.compute_count += 1;
        Ok(self
            .data
            .slice(s![.., row0..row0 + rows, col0..col0 + cols])
            .to_owned())
    }
}
