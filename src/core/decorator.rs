use crate::core::pipeline::{Accumulator, CancellationToken, Pipeline};
use crate::core::streaming::{StreamingConfig, StreamingManager, StreamingPlan};
use crate::types::{Region, StreamError, StreamResult};
use std::time::{Duration, Instant};

/// Step of the streaming state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoratorState {
    Idle,
    RegionQueried,
    Reset,
    TileRequested(usize),
    TileComputed(usize),
    AccumulatorUpdated(usize),
    Finalized,
}

impl DecoratorState {
    /// Legal transitions of one `update()` pass. Any state may fall back to
    /// `Idle` when the pass fails.
    pub fn can_transition_to(&self, next: DecoratorState) -> bool {
        use DecoratorState::*;

        match (*self, next) {
            (_, Idle) => true,
            (Idle, RegionQueried) => true,
            (RegionQueried, Reset) => true,
            (Reset, TileRequested(0)) => true,
            (Reset, Finalized) => true,
            (TileRequested(i), TileComputed(j)) => i == j,
            (TileComputed(i), AccumulatorUpdated(j)) => i == j,
            (AccumulatorUpdated(i), TileRequested(j)) => j == i + 1,
            (AccumulatorUpdated(_), Finalized) => true,
            _ => false,
        }
    }
}

/// Summary of one completed streaming pass
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingReport {
    /// Largest possible region of the pipeline
    pub region: Region,
    pub requested_splits: usize,
    pub splits: usize,
    pub pixels_processed: u64,
    pub elapsed: Duration,
}

/// Callback receiving every state the decorator enters
pub type StateObserver<'a> = Box<dyn FnMut(DecoratorState) + 'a>;

/// Drives a persistent accumulator over every tile of a pipeline.
///
/// Tiles are computed one after the other so that only one tile is held in
/// memory at a time; any parallelism happens inside the pipeline or the
/// accumulator while a tile is processed. Both collaborators are borrowed
/// and outlive the decorator.
pub struct PersistentStreamingDecorator<'a, P, A>
where
    P: Pipeline,
    A: Accumulator<P::Pixel>,
{
    pipeline: &'a mut P,
    accumulator: Option<&'a mut A>,
    manager: StreamingManager,
    cancellation: Option<CancellationToken>,
    plan: Option<StreamingPlan>,
    state: DecoratorState,
    observer: Option<StateObserver<'a>>,
}

impl<'a, P, A> PersistentStreamingDecorator<'a, P, A>
where
    P: Pipeline,
    A: Accumulator<P::Pixel>,
{
    pub fn new(pipeline: &'a mut P, config: StreamingConfig) -> Self {
        Self {
            pipeline,
            accumulator: None,
            manager: StreamingManager::new(config),
            cancellation: None,
            plan: None,
            state: DecoratorState::Idle,
            observer: None,
        }
    }

    /// Decorator with the accumulator already attached
    pub fn with_accumulator(pipeline: &'a mut P, accumulator: &'a mut A, config: StreamingConfig) -> Self {
        let mut decorator = Self::new(pipeline, config);
        decorator.set_accumulator(accumulator);
        decorator
    }

    pub fn set_accumulator(&mut self, accumulator: &'a mut A) {
        self.accumulator = Some(accumulator);
    }

    pub fn accumulator(&self) -> Option<&A> {
        self.accumulator.as_deref()
    }

    pub fn accumulator_mut(&mut self) -> Option<&mut A> {
        self.accumulator.as_deref_mut()
    }

    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.cancellation = Some(token);
    }

    /// Call `observer` on every state transition of `update()`
    pub fn set_state_observer<F>(&mut self, observer: F)
    where
        F: FnMut(DecoratorState) + 'a,
    {
        self.observer = Some(Box::new(observer));
    }

    pub fn pipeline(&self) -> &P {
        self.pipeline
    }

    pub fn config(&self) -> &StreamingConfig {
        self.manager.config()
    }

    /// Plan of the last successful pass
    pub fn plan(&self) -> Option<&StreamingPlan> {
        self.plan.as_ref()
    }

    /// Current state. Between calls to `update()` this is always `Idle`;
    /// use `set_state_observer` to follow a pass.
    pub fn state(&self) -> DecoratorState {
        self.state
    }

    /// Stream the whole largest possible region through the accumulator,
    /// then finalize it.
    ///
    /// On failure the accumulator keeps whatever partial state it reached;
    /// the next `update()` resets it.
    pub fn update(&mut self) -> StreamResult<StreamingReport> {
        self.plan = None;
        let result = self.run();
        self.enter(DecoratorState::Idle);

        if let Err(e) = &result {
            log::debug!("Streaming pass aborted: {}", e);
        }
        result
    }

    fn enter(&mut self, next: DecoratorState) {
        Self::transition(&mut self.state, &mut self.observer, next);
    }

    fn transition(
        state: &mut DecoratorState,
        observer: &mut Option<StateObserver<'a>>,
        next: DecoratorState,
    ) {
        debug_assert!(
            state.can_transition_to(next),
            "illegal decorator transition {:?} -> {:?}",
            state,
            next
        );
        log::trace!("Decorator state {:?} -> {:?}", state, next);
        *state = next;
        if let Some(observer) = observer {
            observer(next);
        }
    }

    fn run(&mut self) -> StreamResult<StreamingReport> {
        let start_time = Instant::now();

        let accumulator = self
            .accumulator
            .as_deref_mut()
            .ok_or(StreamError::MissingCollaborator("accumulator"))?;

        let region = self.pipeline.largest_possible_region();
        region.validate()?;
        Self::transition(&mut self.state, &mut self.observer, DecoratorState::RegionQueried);

        let bands = self.pipeline.number_of_bands();
        log::info!("Starting streaming pass over {} ({} bands)", region, bands);

        accumulator.reset(&region, bands)?;
        Self::transition(&mut self.state, &mut self.observer, DecoratorState::Reset);

        let plan = self.manager.prepare(
            &region,
            bands,
            std::mem::size_of::<P::Pixel>(),
            self.pipeline.tile_hint(),
        )?;
        let total = plan.splits();
        let mut pixels_processed = 0u64;

        for i in 0..total {
            if let Some(token) = &self.cancellation {
                if token.is_cancelled() {
                    log::warn!("Streaming cancelled after {} of {} tiles", i, total);
                    return Err(StreamError::Cancelled { completed: i, total });
                }
            }

            let split = plan.split(i)?;
            Self::transition(&mut self.state, &mut self.observer, DecoratorState::TileRequested(i));

            let upstream_failure = |e: StreamError| StreamError::UpstreamComputeFailure {
                region: split,
                source: Box::new(e),
            };
            self.pipeline.request_region(split).map_err(upstream_failure)?;
            let tile = self
                .pipeline
                .compute_requested_region()
                .map_err(upstream_failure)?;

            let expected = split.tile_shape(bands);
            if tile.dim() != expected {
                return Err(StreamError::UpstreamComputeFailure {
                    region: split,
                    source: format!(
                        "pipeline returned a {:?} tile, expected {:?}",
                        tile.dim(),
                        expected
                    )
                    .into(),
                });
            }
            Self::transition(&mut self.state, &mut self.observer, DecoratorState::TileComputed(i));

            accumulator.update(&split, tile.view())?;
            Self::transition(&mut self.state, &mut self.observer, DecoratorState::AccumulatorUpdated(i));

            pixels_processed += split.number_of_pixels();
            log::debug!("Tile {}/{} {} processed", i + 1, total, split);
        }

        accumulator.finalize()?;
        Self::transition(&mut self.state, &mut self.observer, DecoratorState::Finalized);

        let elapsed = start_time.elapsed();
        log::info!(
            "Streaming pass completed: {} tiles, {} pixels in {:.3}s",
            total,
            pixels_processed,
            elapsed.as_secs_f64()
        );

        let report = StreamingReport {
            region,
            requested_splits: plan.requested_splits(),
            splits: total,
            pixels_processed,
            elapsed,
        };
        self.plan = Some(plan);
        Ok(report)
    }
}
