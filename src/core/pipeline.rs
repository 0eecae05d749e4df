use crate::types::{Pixel, Region, Size, StreamResult, TileData, TileView};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Upstream producer of raster data.
///
/// The driver first asks for the largest possible region, then for each
/// piece requests exactly that region and computes it synchronously. The
/// returned array must have shape `(bands, rows, cols)` of the requested
/// region.
pub trait Pipeline {
    type Pixel: Pixel;

    fn largest_possible_region(&self) -> Region;

    fn number_of_bands(&self) -> usize {
        1
    }

    /// Preferred tile size of the underlying storage, if any
    fn tile_hint(&self) -> Option<Size> {
        None
    }

    fn request_region(&mut self, region: Region) -> StreamResult<()>;

    fn compute_requested_region(&mut self) -> StreamResult<TileData<Self::Pixel>>;
}

/// Persistent computation fed one tile at a time.
///
/// Lifecycle: `reset`, any number of `update` calls, then `finalize`, after
/// which `result` returns the aggregate.
pub trait Accumulator<T: Pixel> {
    type Output;

    /// Clear partial state before streaming `region` with `bands` bands
    fn reset(&mut self, region: &Region, bands: usize) -> StreamResult<()>;

    fn update(&mut self, region: &Region, tile: TileView<'_, T>) -> StreamResult<()>;

    fn finalize(&mut self) -> StreamResult<()>;

    /// Final result, `None` until `finalize` succeeded
    fn result(&self) -> Option<&Self::Output>;
}

/// Cooperative cancellation flag, checked between tiles
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Pipeline stage applying a per-pixel function to every band of its input.
///
/// The requested region is forwarded unchanged to the input; the function
/// runs across worker threads inside each tile.
pub struct UnaryFunctorFilter<P, F, O> {
    input: P,
    functor: F,
    requested: Option<Region>,
    _output: PhantomData<O>,
}

impl<P, F, O> UnaryFunctorFilter<P, F, O>
where
    P: Pipeline,
    F: Fn(P::Pixel) -> O + Send + Sync,
    O: Pixel,
{
    pub fn new(input: P, functor: F) -> Self {
        Self {
            input,
            functor,
            requested: None,
            _output: PhantomData,
        }
    }

    pub fn input(&self) -> &P {
        &self.input
    }

    pub fn into_inner(self) -> P {
        self.input
    }

    /// Region last forwarded upstream
    pub fn requested_region(&self) -> Option<Region> {
        self.requested
    }

    #[cfg(feature = "parallel")]
    fn apply(&self, tile: &TileData<P::Pixel>) -> TileData<O> {
        let functor = &self.functor;
        ndarray::Zip::from(tile).par_map_collect(|&value| functor(value))
    }

    #[cfg(not(feature = "parallel"))]
    fn apply(&self, tile: &TileData<P::Pixel>) -> TileData<O> {
        tile.mapv(|value| (self.functor)(value))
    }
}

impl<P, F, O> Pipeline for UnaryFunctorFilter<P, F, O>
where
    P: Pipeline,
    F: Fn(P::Pixel) -> O + Send + Sync,
    O: Pixel,
{
    type Pixel = O;

    fn largest_possible_region(&self) -> Region {
        self.input.largest_possible_region()
    }

    fn number_of_bands(&self) -> usize {
        self.input.number_of_bands()
    }

    fn tile_hint(&self) -> Option<Size> {
        self.input.tile_hint()
    }

    fn request_region(&mut self, region: Region) -> StreamResult<()> {
        self.input.request_region(region)?;
        self.requested = Some(region);
        Ok(())
    }

    fn compute_requested_region(&mut self) -> StreamResult<TileData<O>> {
        let tile = self.input.compute_requested_region()?;
        Ok(self.apply(&tile))
    }
}
