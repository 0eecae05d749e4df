use crate::core::pipeline::Accumulator;
use crate::types::{Pixel, Region, StreamResult, TileView};

/// Sum of every component of every pixel
#[derive(Debug, Clone, Default)]
pub struct PixelSum {
    partial: f64,
    tiles: usize,
    result: Option<f64>,
}

impl PixelSum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tiles seen since the last reset
    pub fn tiles_seen(&self) -> usize {
        self.tiles
    }

    /// Finalized sum
    pub fn value(&self) -> Option<f64> {
        self.result
    }
}

impl<T: Pixel> Accumulator<T> for PixelSum {
    type Output = f64;

    fn reset(&mut self, _region: &Region, _bands: usize) -> StreamResult<()> {
        self.partial = 0.0;
        self.tiles = 0;
        self.result = None;
        Ok(())
    }

    fn update(&mut self, _region: &Region, tile: TileView<'_, T>) -> StreamResult<()> {
        self.partial += tile
            .iter()
            .map(|v| v.to_f64().unwrap_or(0.0))
            .sum::<f64>();
        self.tiles += 1;
        Ok(())
    }

    fn finalize(&mut self) -> StreamResult<()> {
        self.result = Some(self.partial);
        Ok(())
    }

    fn result(&self) -> Option<&f64> {
        self.result.as_ref()
    }
}
