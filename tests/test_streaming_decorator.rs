use ndarray::Array3;
use tilestream::core::{
    Accumulator, CancellationToken, DecoratorState, PersistentStreamingDecorator, Pipeline,
    PixelSum, StreamingConfig, StreamingMode, UnaryFunctorFilter,
};
use tilestream::{InMemorySource, Index, Region, Size, StreamError, StreamResult, TileData, TileView};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Adaptive mode with a bias large enough to ask for one split per pixel of a 50x50 raster
fn adaptive_config(hint: Size) -> StreamingConfig {
    StreamingConfig::default()
        .with_mode(StreamingMode::Adaptive {
            available_ram_mb: 1,
            bias: 1.0e6,
        })
        .with_tile_hint(hint)
}

fn constant_source(value: f32) -> InMemorySource<f32> {
    InMemorySource::new(Array3::from_elem((1, 50, 50), value))
}

#[test]
fn test_sum_independent_of_tiling() {
    init_logging();

    let constant = 3.0f32;
    let expected = 50.0 * 50.0 * constant as f64;

    for (hint, tiles) in [
        (Size::new(50, 50), 1),
        (Size::new(10, 10), 25),
        (Size::new(1, 1), 2500),
    ] {
        let mut source = constant_source(constant);
        let mut sum = PixelSum::new();

        let report = {
            let mut decorator =
                PersistentStreamingDecorator::with_accumulator(&mut source, &mut sum, adaptive_config(hint));
            let report = decorator.update().expect("Streaming pass failed");
            assert_eq!(decorator.state(), DecoratorState::Idle);
            assert_eq!(decorator.plan().map(|p| p.splits()), Some(tiles));
            report
        };

        println!("hint {}x{}: {} tiles, sum {:?}", hint.x, hint.y, report.splits, sum.value());
        assert_eq!(report.splits, tiles);
        assert_eq!(report.pixels_processed, 2500);
        assert_eq!(report.region, Region::from_size(Size::new(50, 50)));
        assert_eq!(sum.tiles_seen(), tiles);
        assert_eq!(sum.value(), Some(expected));
        assert_eq!(source.request_count(), tiles);
    }
}

#[test]
fn test_sum_with_every_streaming_mode() {
    init_logging();

    let data = Array3::from_shape_fn((2, 50, 50), |(b, r, c)| (b + r * 50 + c) as f32);
    let expected: f64 = data.iter().map(|&v| v as f64).sum();

    let modes = [
        StreamingMode::Adaptive {
            available_ram_mb: 0,
            bias: 1.0,
        },
        StreamingMode::TiledRam {
            available_ram_mb: 1,
            bias: 100.0,
        },
        StreamingMode::StrippedRam {
            available_ram_mb: 1,
            bias: 100.0,
        },
        StreamingMode::TiledDivisions(9),
        StreamingMode::StrippedDivisions(7),
        StreamingMode::TileDimension(16),
        StreamingMode::StripLines(3),
    ];

    for mode in modes {
        let mut source = InMemorySource::new(data.clone()).with_origin(Index::new(-7, 11));
        let mut sum = PixelSum::new();
        let config = StreamingConfig::default().with_mode(mode);

        let report = PersistentStreamingDecorator::with_accumulator(&mut source, &mut sum, config)
            .update()
            .expect("Streaming pass failed");

        println!("{:?}: {} splits for {} requested", mode, report.splits, report.requested_splits);
        assert_eq!(sum.value(), Some(expected), "{:?}", mode);
        assert_eq!(report.pixels_processed, 2500);
    }
}

#[test]
fn test_missing_accumulator() {
    init_logging();

    let mut source = constant_source(1.0);
    {
        let mut decorator =
            PersistentStreamingDecorator::<_, PixelSum>::new(&mut source, StreamingConfig::default());
        let err = decorator.update().expect_err("Update without accumulator should fail");

        assert!(matches!(err, StreamError::MissingCollaborator(_)));
        assert!(!err.is_recoverable());
        assert_eq!(decorator.state(), DecoratorState::Idle);
        assert!(decorator.plan().is_none());
    }

    assert_eq!(source.request_count(), 0);
    assert_eq!(source.compute_count(), 0);
}

#[test]
fn test_accumulator_reused_across_updates() {
    let mut source = constant_source(2.0);
    let mut sum = PixelSum::new();
    let mut decorator = PersistentStreamingDecorator::with_accumulator(
        &mut source,
        &mut sum,
        adaptive_config(Size::new(25, 25)),
    );

    decorator.update().expect("First streaming pass failed");
    decorator.update().expect("Second streaming pass failed");

    // Reset between passes: the second sum does not include the first
    let sum = decorator.accumulator().expect("Accumulator should be attached");
    assert_eq!(sum.value(), Some(5000.0));
    assert_eq!(sum.tiles_seen(), 4);
}

#[test]
fn test_state_sequence_of_a_pass() {
    use DecoratorState::*;

    let mut source = InMemorySource::new(Array3::<f32>::zeros((1, 20, 20)));
    let mut sum = PixelSum::new();
    let mut states = Vec::new();

    {
        let mut decorator = PersistentStreamingDecorator::with_accumulator(
            &mut source,
            &mut sum,
            StreamingConfig::default().with_mode(StreamingMode::StrippedDivisions(2)),
        );
        decorator.set_state_observer(|state| states.push(state));
        decorator.update().expect("Streaming pass failed");
    }

    assert_eq!(
        states,
        vec![
            RegionQueried,
            Reset,
            TileRequested(0),
            TileComputed(0),
            AccumulatorUpdated(0),
            TileRequested(1),
            TileComputed(1),
            AccumulatorUpdated(1),
            Finalized,
            Idle,
        ]
    );
    for pair in states.windows(2) {
        assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
    }
}

#[test]
fn test_cancellation_before_first_tile() {
    init_logging();

    let token = CancellationToken::new();
    let mut source = constant_source(1.0);
    let mut sum = PixelSum::new();

    {
        let mut decorator = PersistentStreamingDecorator::with_accumulator(
            &mut source,
            &mut sum,
            adaptive_config(Size::new(10, 10)),
        );
        decorator.set_cancellation_token(token.clone());

        token.cancel();
        let err = decorator.update().expect_err("Cancelled pass should fail");
        assert!(matches!(err, StreamError::Cancelled { completed: 0, total: 25 }));
        assert!(err.is_recoverable());

        token.reset();
        decorator.update().expect("Streaming pass after reset failed");
    }

    assert_eq!(sum.value(), Some(2500.0));
}

#[test]
fn test_cancellation_after_some_tiles() {
    init_logging();

    let token = CancellationToken::new();
    let mut source = constant_source(1.0);
    let mut sum = PixelSum::new();

    let err = {
        let mut decorator = PersistentStreamingDecorator::with_accumulator(
            &mut source,
            &mut sum,
            adaptive_config(Size::new(10, 10)),
        );
        decorator.set_cancellation_token(token.clone());

        // Cancel once the third tile has been accumulated
        let trigger = token.clone();
        decorator.set_state_observer(move |state| {
            if state == DecoratorState::AccumulatorUpdated(2) {
                trigger.cancel();
            }
        });

        let err = decorator.update().expect_err("Cancelled pass should fail");
        assert_eq!(decorator.state(), DecoratorState::Idle);
        err
    };

    assert!(matches!(err, StreamError::Cancelled { completed: 3, total: 25 }));
    assert_eq!(source.request_count(), 3);
    assert_eq!(source.compute_count(), 3);
    assert_eq!(sum.tiles_seen(), 3);
    assert_eq!(sum.value(), None);
}

/// Pipeline failing on the n-th computed tile
struct FailingPipeline {
    inner: InMemorySource<f32>,
    fail_at: usize,
}

impl Pipeline for FailingPipeline {
    type Pixel = f32;

    fn largest_possible_region(&self) -> Region {
        self.inner.largest_possible_region()
    }

    fn tile_hint(&self) -> Option<Size> {
        Some(Size::new(10, 10))
    }

    fn request_region(&mut self, region: Region) -> StreamResult<()> {
        self.inner.request_region(region)
    }

    fn compute_requested_region(&mut self) -> StreamResult<TileData<f32>> {
        if self.inner.compute_count() == self.fail_at {
            return Err(StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated block",
            )));
        }
        self.inner.compute_requested_region()
    }
}

#[test]
fn test_upstream_failure_aborts_update() {
    init_logging();

    let mut pipeline = FailingPipeline {
        inner: constant_source(1.0),
        fail_at: 3,
    };
    let mut sum = PixelSum::new();
    let config = StreamingConfig::default().with_mode(StreamingMode::Adaptive {
        available_ram_mb: 1,
        bias: 1.0e6,
    });

    let err = PersistentStreamingDecorator::with_accumulator(&mut pipeline, &mut sum, config)
        .update()
        .expect_err("Failing upstream should abort the pass");

    match &err {
        StreamError::UpstreamComputeFailure { region, .. } => {
            // Fourth 10x10 tile of the first row
            assert_eq!(*region, Region::new(Index::new(30, 0), Size::new(10, 10)));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.is_recoverable());

    // Partial state is kept, nothing was finalized
    assert_eq!(sum.tiles_seen(), 3);
    assert_eq!(sum.value(), None);
}

/// Accumulator recording every region it receives
#[derive(Default)]
struct RegionRecorder {
    full: Option<Region>,
    seen: Vec<Region>,
    finalized: bool,
}

impl Accumulator<u8> for RegionRecorder {
    type Output = Vec<Region>;

    fn reset(&mut self, region: &Region, _bands: usize) -> StreamResult<()> {
        self.full = Some(*region);
        self.seen.clear();
        self.finalized = false;
        Ok(())
    }

    fn update(&mut self, region: &Region, tile: TileView<'_, u8>) -> StreamResult<()> {
        assert_eq!(tile.dim(), region.tile_shape(1));
        self.seen.push(*region);
        Ok(())
    }

    fn finalize(&mut self) -> StreamResult<()> {
        self.finalized = true;
        Ok(())
    }

    fn result(&self) -> Option<&Vec<Region>> {
        self.finalized.then_some(&self.seen)
    }
}

#[test]
fn test_tiles_follow_pipeline_hint() {
    let mut source = InMemorySource::new(Array3::<u8>::zeros((1, 30, 45))).with_tile_hint(Size::new(20, 20));
    let mut recorder = RegionRecorder::default();
    let config = StreamingConfig::default().with_mode(StreamingMode::Adaptive {
        available_ram_mb: 1,
        bias: 1.0e6,
    });

    PersistentStreamingDecorator::with_accumulator(&mut source, &mut recorder, config)
        .update()
        .expect("Streaming pass failed");

    let tiles = recorder.result().expect("Recorder should be finalized");
    assert_eq!(recorder.full, Some(Region::from_size(Size::new(45, 30))));
    assert_eq!(tiles.len(), 6);
    assert_eq!(tiles[0], Region::new(Index::new(0, 0), Size::new(20, 20)));
    assert_eq!(tiles[2], Region::new(Index::new(40, 0), Size::new(5, 20)));
    assert_eq!(tiles[5], Region::new(Index::new(40, 20), Size::new(5, 10)));
}

#[test]
fn test_functor_filter_in_pipeline() {
    let source = constant_source(4.0);
    let mut filter = UnaryFunctorFilter::new(source, |v: f32| v.sqrt() as f64);
    let mut sum = PixelSum::new();
    let config = StreamingConfig::default().with_mode(StreamingMode::StripLines(7));

    let report = PersistentStreamingDecorator::with_accumulator(&mut filter, &mut sum, config)
        .update()
        .expect("Streaming pass through the filter failed");

    assert_eq!(report.splits, 8);
    assert_eq!(sum.value(), Some(5000.0));
    assert_eq!(filter.input().request_count(), 8);
}
