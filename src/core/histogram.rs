use crate::core::pipeline::Accumulator;
use crate::types::{Pixel, Region, StreamError, StreamResult, TileView};
use ndarray::Axis;
use serde::{Deserialize, Serialize};

/// Per-band histogram over `[minimum, maximum)` with equal-width bins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub minimum: f64,
    pub maximum: f64,
    /// `bins[band][bin]`
    pub bins: Vec<Vec<u64>>,
    /// Values below `minimum`, per band
    pub underflow: Vec<u64>,
    /// Values at or above `maximum`, per band
    pub overflow: Vec<u64>,
    /// NaN values, per band
    pub ignored: Vec<u64>,
}

impl Histogram {
    fn empty(minimum: f64, maximum: f64, bin_count: usize, bands: usize) -> Self {
        Self {
            minimum,
            maximum,
            bins: vec![vec![0; bin_count]; bands],
            underflow: vec![0; bands],
            overflow: vec![0; bands],
            ignored: vec![0; bands],
        }
    }

    pub fn number_of_bands(&self) -> usize {
        self.bins.len()
    }

    pub fn bin_count(&self) -> usize {
        self.bins.first().map_or(0, Vec::len)
    }

    pub fn bin_width(&self) -> f64 {
        (self.maximum - self.minimum) / self.bin_count().max(1) as f64
    }

    /// Bin holding `value`, `None` outside `[minimum, maximum)` or for NaN
    pub fn bin_index(&self, value: f64) -> Option<usize> {
        if value.is_nan() || value < self.minimum || value >= self.maximum {
            return None;
        }
        let bin = ((value - self.minimum) / self.bin_width()) as usize;
        Some(bin.min(self.bin_count().saturating_sub(1)))
    }

    /// Values counted in the bins of `band`
    pub fn total(&self, band: usize) -> u64 {
        self.bins.get(band).map_or(0, |bins| bins.iter().sum())
    }

    fn add(&mut self, band: usize, value: f64) {
        if value.is_nan() {
            self.ignored[band] += 1;
        } else if value < self.minimum {
            self.underflow[band] += 1;
        } else if value >= self.maximum {
            self.overflow[band] += 1;
        } else if let Some(bin) = self.bin_index(value) {
            self.bins[band][bin] += 1;
        }
    }

    fn merge(&mut self, other: &Histogram) {
        for (bins, other_bins) in self.bins.iter_mut().zip(&other.bins) {
            for (count, other_count) in bins.iter_mut().zip(other_bins) {
                *count += other_count;
            }
        }
        for (counts, other_counts) in [
            (&mut self.underflow, &other.underflow),
            (&mut self.overflow, &other.overflow),
            (&mut self.ignored, &other.ignored),
        ] {
            for (count, other_count) in counts.iter_mut().zip(other_counts) {
                *count += other_count;
            }
        }
    }

    fn accumulate<T: Pixel>(&mut self, tile: TileView<'_, T>) {
        for (band, plane) in tile.axis_iter(Axis(0)).enumerate() {
            for value in plane.iter() {
                self.add(band, value.to_f64().unwrap_or(f64::NAN));
            }
        }
    }
}

/// Streamed per-band histogram with a fixed value range
#[derive(Debug, Clone)]
pub struct StreamingHistogram {
    minimum: f64,
    maximum: f64,
    bin_count: usize,
    partial: Histogram,
    result: Option<Histogram>,
}

impl StreamingHistogram {
    pub fn new(minimum: f64, maximum: f64, bin_count: usize) -> StreamResult<Self> {
        if !minimum.is_finite() || !maximum.is_finite() || minimum >= maximum {
            return Err(StreamError::InvalidConfiguration(format!(
                "histogram range [{}, {}) is empty or not finite",
                minimum, maximum
            )));
        }
        if bin_count == 0 {
            return Err(StreamError::InvalidConfiguration(
                "histogram needs at least one bin".to_string(),
            ));
        }

        Ok(Self {
            minimum,
            maximum,
            bin_count,
            partial: Histogram::empty(minimum, maximum, bin_count, 0),
            result: None,
        })
    }

    /// Finalized histogram
    pub fn histogram(&self) -> Option<&Histogram> {
        self.result.as_ref()
    }

    #[cfg(feature = "parallel")]
    fn compute_tile<T: Pixel>(&self, tile: TileView<'_, T>) -> Histogram {
        use rayon::prelude::*;

        let (bands, rows, _) = tile.dim();
        let empty = || Histogram::empty(self.minimum, self.maximum, self.bin_count, bands);
        if rows == 0 {
            return empty();
        }

        let chunk_rows = std::cmp::max(1, rows / rayon::current_num_threads());

        tile.axis_chunks_iter(Axis(1), chunk_rows)
            .into_par_iter()
            .map(|chunk| {
                let mut partial = empty();
                partial.accumulate(chunk);
                partial
            })
            .reduce(empty, |mut acc, partial| {
                acc.merge(&partial);
                acc
            })
    }

    #[cfg(not(feature = "parallel"))]
    fn compute_tile<T: Pixel>(&self, tile: TileView<'_, T>) -> Histogram {
        let mut partial = Histogram::empty(
            self.minimum,
            self.maximum,
            self.bin_count,
            tile.len_of(Axis(0)),
        );
        partial.accumulate(tile);
        partial
    }
}

impl<T: Pixel> Accumulator<T> for StreamingHistogram {
    type Output = Histogram;

    fn reset(&mut self, _region: &Region, bands: usize) -> StreamResult<()> {
        self.partial = Histogram::empty(self.minimum, self.maximum, self.bin_count, bands);
        self.result = None;
        Ok(())
    }

    fn update(&mut self, region: &Region, tile: TileView<'_, T>) -> StreamResult<()> {
        let bands = tile.len_of(Axis(0));
        if bands != self.partial.number_of_bands() {
            return Err(StreamError::Accumulator(format!(
                "tile {} has {} bands, histogram was reset for {}",
                region,
                bands,
                self.partial.number_of_bands()
            )));
        }

        let partial = self.compute_tile(tile);
        self.partial.merge(&partial);
        Ok(())
    }

    fn finalize(&mut self) -> StreamResult<()> {
        self.result = Some(self.partial.clone());
        Ok(())
    }

    fn result(&self) -> Option<&Histogram> {
        self.result.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Size;
    use ndarray::Array3;

    #[test]
    fn test_invalid_histogram() {
        assert!(StreamingHistogram::new(1.0, 1.0, 10).is_err());
        assert!(StreamingHistogram::new(0.0, 1.0, 0).is_err());
        assert!(StreamingHistogram::new(f64::NEG_INFINITY, 1.0, 4).is_err());
    }

    #[test]
    fn test_histogram_counts() {
        let data = Array3::from_shape_vec(
            (1, 2, 4),
            vec![-1.0f32, 0.0, 0.5, 2.4, 2.5, 9.99, 10.0, f32::NAN],
        )
        .unwrap();
        let region = Region::from_size(Size::new(4, 2));

        let mut hist = StreamingHistogram::new(0.0, 10.0, 4).unwrap();
        Accumulator::<f32>::reset(&mut hist, &region, 1).unwrap();
        hist.update(&region, data.view()).unwrap();
        Accumulator::<f32>::finalize(&mut hist).unwrap();

        let h = hist.histogram().unwrap();
        assert_eq!(h.bins[0], vec![3, 1, 0, 1]);
        assert_eq!(h.underflow[0], 1);
        assert_eq!(h.overflow[0], 1);
        assert_eq!(h.ignored[0], 1);
        assert_eq!(h.total(0), 5);
        assert_eq!(h.bin_index(2.5), Some(1));
        assert_eq!(h.bin_index(10.0), None);
    }
}
