use crate::core::pipeline::Accumulator;
use crate::types::{Pixel, Region, StreamError, StreamResult, TileView};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Options of the streamed statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsParams {
    /// Per-band minimum and maximum
    pub enable_min_max: bool,
    /// Per-band sum and mean, component mean
    pub enable_first_order: bool,
    /// Covariance and correlation (implies first order)
    pub enable_second_order: bool,
    /// Normalize covariances by n - 1 instead of n
    pub use_unbiased_estimator: bool,
    /// Skip pixels with a non-finite component
    pub ignore_infinite_values: bool,
    /// Skip pixels whose components all equal this value
    pub ignore_user_value: Option<f64>,
}

impl Default for StatisticsParams {
    fn default() -> Self {
        Self {
            enable_min_max: true,
            enable_first_order: true,
            enable_second_order: true,
            use_unbiased_estimator: true,
            ignore_infinite_values: true,
            ignore_user_value: None,
        }
    }
}

/// Aggregate statistics of a multi-band raster. Disabled statistics are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStatistics {
    pub minimum: Option<Vec<f64>>,
    pub maximum: Option<Vec<f64>>,
    pub sum: Option<Vec<f64>>,
    pub mean: Option<Vec<f64>>,
    /// Band x band covariance matrix
    pub covariance: Option<Array2<f64>>,
    /// Band x band matrix of second order moments E[x_r x_c]
    pub correlation: Option<Array2<f64>>,
    /// Mean over all components of all relevant pixels
    pub component_mean: Option<f64>,
    pub component_correlation: Option<f64>,
    pub component_covariance: Option<f64>,
    pub relevant_pixels: u64,
    pub ignored_infinite_pixels: u64,
    pub ignored_user_pixels: u64,
}

/// Running sums of one worker or one tile
#[derive(Debug, Clone)]
struct PartialStatistics {
    minimum: Vec<f64>,
    maximum: Vec<f64>,
    sum: Vec<f64>,
    second_order: Array2<f64>,
    component_sum: f64,
    component_square_sum: f64,
    relevant: u64,
    ignored_infinite: u64,
    ignored_user: u64,
}

impl PartialStatistics {
    fn new(bands: usize) -> Self {
        Self {
            minimum: vec![f64::INFINITY; bands],
            maximum: vec![f64::NEG_INFINITY; bands],
            sum: vec![0.0; bands],
            second_order: Array2::zeros((bands, bands)),
            component_sum: 0.0,
            component_square_sum: 0.0,
            relevant: 0,
            ignored_infinite: 0,
            ignored_user: 0,
        }
    }

    fn accumulate<T: Pixel>(&mut self, tile: TileView<'_, T>, params: &StatisticsParams) {
        let (bands, rows, cols) = tile.dim();
        let mut pixel = vec![0.0f64; bands];

        for row in 0..rows {
            for col in 0..cols {
                for (band, value) in pixel.iter_mut().enumerate() {
                    *value = tile[[band, row, col]].to_f64().unwrap_or(f64::NAN);
                }
                self.accumulate_pixel(&pixel, params);
            }
        }
    }

    fn accumulate_pixel(&mut self, pixel: &[f64], params: &StatisticsParams) {
        if params.ignore_infinite_values && !pixel.iter().sum::<f64>().is_finite() {
            self.ignored_infinite += 1;
            return;
        }
        if let Some(ignored) = params.ignore_user_value {
            if pixel.iter().all(|&v| v == ignored) {
                self.ignored_user += 1;
                return;
            }
        }

        self.relevant += 1;

        if params.enable_min_max {
            for (band, &v) in pixel.iter().enumerate() {
                self.minimum[band] = self.minimum[band].min(v);
                self.maximum[band] = self.maximum[band].max(v);
            }
        }

        if params.enable_first_order {
            for (band, &v) in pixel.iter().enumerate() {
                self.sum[band] += v;
                self.component_sum += v;
            }
        }

        if params.enable_second_order {
            for (r, &vr) in pixel.iter().enumerate() {
                for (c, &vc) in pixel.iter().enumerate() {
                    self.second_order[[r, c]] += vr * vc;
                }
                self.component_square_sum += vr * vr;
            }
        }
    }

    fn merge(&mut self, other: &PartialStatistics) {
        for (band, (&min, &max)) in other.minimum.iter().zip(&other.maximum).enumerate() {
            self.minimum[band] = self.minimum[band].min(min);
            self.maximum[band] = self.maximum[band].max(max);
        }
        for (sum, &other_sum) in self.sum.iter_mut().zip(&other.sum) {
            *sum += other_sum;
        }
        self.second_order += &other.second_order;
        self.component_sum += other.component_sum;
        self.component_square_sum += other.component_square_sum;
        self.relevant += other.relevant;
        self.ignored_infinite += other.ignored_infinite;
        self.ignored_user += other.ignored_user;
    }
}

/// Streamed per-band statistics: min/max, sum, mean, covariance and
/// correlation, plus the same moments over all components.
#[derive(Debug, Clone)]
pub struct StreamingStatistics {
    params: StatisticsParams,
    bands: usize,
    partial: PartialStatistics,
    result: Option<ImageStatistics>,
}

impl Default for StreamingStatistics {
    fn default() -> Self {
        Self::new(StatisticsParams::default())
    }
}

impl StreamingStatistics {
    pub fn new(mut params: StatisticsParams) -> Self {
        if params.enable_second_order {
            params.enable_first_order = true;
        }
        Self {
            params,
            bands: 0,
            partial: PartialStatistics::new(0),
            result: None,
        }
    }

    pub fn params(&self) -> &StatisticsParams {
        &self.params
    }

    /// Finalized statistics
    pub fn statistics(&self) -> Option<&ImageStatistics> {
        self.result.as_ref()
    }

    /// Statistics of one tile, rows spread over the worker threads
    #[cfg(feature = "parallel")]
    fn compute_tile<T: Pixel>(&self, tile: TileView<'_, T>) -> PartialStatistics {
        use rayon::prelude::*;

        let (bands, rows, _) = tile.dim();
        if rows == 0 {
            return PartialStatistics::new(bands);
        }

        let chunk_rows = std::cmp::max(1, rows / rayon::current_num_threads());
        let params = &self.params;

        tile.axis_chunks_iter(Axis(1), chunk_rows)
            .into_par_iter()
            .map(|chunk| {
                let mut partial = PartialStatistics::new(bands);
                partial.accumulate(chunk, params);
                partial
            })
            .reduce(
                || PartialStatistics::new(bands),
                |mut acc, partial| {
                    acc.merge(&partial);
                    acc
                },
            )
    }

    #[cfg(not(feature = "parallel"))]
    fn compute_tile<T: Pixel>(&self, tile: TileView<'_, T>) -> PartialStatistics {
        let mut partial = PartialStatistics::new(tile.len_of(Axis(0)));
        partial.accumulate(tile, &self.params);
        partial
    }

    fn synthesize(&self) -> StreamResult<ImageStatistics> {
        let partial = &self.partial;
        let n = partial.relevant;
        if n == 0 {
            return Err(StreamError::Accumulator(
                "statistics cannot be computed with zero relevant pixels".to_string(),
            ));
        }

        let count = n as f64;
        let component_count = (n * self.bands as u64) as f64;

        let mut stats = ImageStatistics {
            minimum: None,
            maximum: None,
            sum: None,
            mean: None,
            covariance: None,
            correlation: None,
            component_mean: None,
            component_correlation: None,
            component_covariance: None,
            relevant_pixels: n,
            ignored_infinite_pixels: partial.ignored_infinite,
            ignored_user_pixels: partial.ignored_user,
        };

        if self.params.enable_min_max {
            stats.minimum = Some(partial.minimum.clone());
            stats.maximum = Some(partial.maximum.clone());
        }

        if self.params.enable_first_order {
            let mean: Vec<f64> = partial.sum.iter().map(|s| s / count).collect();
            stats.sum = Some(partial.sum.clone());
            stats.mean = Some(mean);
            stats.component_mean = Some(partial.component_sum / component_count);
        }

        if self.params.enable_second_order {
            let regul = if self.params.use_unbiased_estimator && n > 1 {
                count / (count - 1.0)
            } else {
                1.0
            };
            let regul_component = if self.params.use_unbiased_estimator && component_count > 1.0 {
                component_count / (component_count - 1.0)
            } else {
                1.0
            };

            let correlation = &partial.second_order / count;
            let mean = stats.mean.as_deref().unwrap_or(&[]);
            let covariance = Array2::from_shape_fn(correlation.dim(), |(r, c)| {
                regul * (correlation[[r, c]] - mean[r] * mean[c])
            });

            let component_mean = partial.component_sum / component_count;
            let component_correlation = partial.component_square_sum / component_count;

            stats.covariance = Some(covariance);
            stats.correlation = Some(correlation);
            stats.component_correlation = Some(component_correlation);
            stats.component_covariance =
                Some(regul_component * (component_correlation - component_mean * component_mean));
        }

        Ok(stats)
    }
}

impl<T: Pixel> Accumulator<T> for StreamingStatistics {
    type Output = ImageStatistics;

    fn reset(&mut self, _region: &Region, bands: usize) -> StreamResult<()> {
        self.bands = bands;
        self.partial = PartialStatistics::new(bands);
        self.result = None;
        Ok(())
    }

    fn update(&mut self, region: &Region, tile: TileView<'_, T>) -> StreamResult<()> {
        let bands = tile.len_of(Axis(0));
        if bands != self.bands {
            return Err(StreamError::Accumulator(format!(
                "tile {} has {} bands, statistics were reset for {}",
                region, bands, self.bands
            )));
        }

        let partial = self.compute_tile(tile);
        self.partial.merge(&partial);
        Ok(())
    }

    fn finalize(&mut self) -> StreamResult<()> {
        let stats = self.synthesize()?;
        log::debug!(
            "Statistics synthesized over {} relevant pixels ({} non-finite, {} user-ignored)",
            stats.relevant_pixels,
            stats.ignored_infinite_pixels,
            stats.ignored_user_pixels
        );
        self.result = Some(stats);
        Ok(())
    }

    fn result(&self) -> Option<&ImageStatistics> {
        self.result.as_ref()
    }
}
