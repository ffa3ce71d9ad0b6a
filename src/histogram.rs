use ndarray::ArrayView2;

pub const DEFAULT_HISTOGRAM_BINS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBin {
    pub low: f64,
    pub high: f64,
    pub count: u64,
}

/// Equal-width histogram over the value range of one slice.
///
/// Every bin is half-open except the last, which also holds the maximum.
/// NaN and infinite values cannot be placed on the range; they are counted
/// in [`non_finite`](Histogram::non_finite) so that [`total`](Histogram::total)
/// always equals the number of values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Histogram {
    bins: Vec<HistogramBin>,
    non_finite: u64,
}

impl Histogram {
    /// `bins` of zero is treated as one.
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a f64> + Clone, bins: usize) -> Self {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut non_finite = 0;
        for &v in values.clone() {
            if v.is_finite() {
                min = min.min(v);
                max = max.max(v);
            } else {
                non_finite += 1;
            }
        }

        if min > max {
            return Self {
                bins: Vec::new(),
                non_finite,
            };
        }

        if min == max {
            let count = values.into_iter().filter(|v| v.is_finite()).count() as u64;
            return Self {
                bins: vec![HistogramBin {
                    low: min,
                    high: max,
                    count,
                }],
                non_finite,
            };
        }

        let bin_count = bins.max(1);
        let range = max - min;
        let width = range / bin_count as f64;
        let mut counts = vec![0u64; bin_count];
        for &v in values.into_iter().filter(|v| v.is_finite()) {
            let idx = ((v - min) / range * bin_count as f64).floor() as usize;
            counts[idx.min(bin_count - 1)] += 1;
        }

        let bins = counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| HistogramBin {
                low: min + width * i as f64,
                high: if i + 1 == bin_count {
                    max
                } else {
                    min + width * (i + 1) as f64
                },
                count,
            })
            .collect();

        Self { bins, non_finite }
    }

    pub fn from_slice(slice: &ArrayView2<'_, f64>, bins: usize) -> Self {
        Self::from_values(slice.iter(), bins)
    }

    pub fn bins(&self) -> &[HistogramBin] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Values that were NaN or infinite.
    pub fn non_finite(&self) -> u64 {
        self.non_finite
    }

    /// Every value seen, binned or not.
    pub fn total(&self) -> u64 {
        self.bins.iter().map(|bin| bin.count).sum::<u64>() + self.non_finite
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        Some((self.bins.first()?.low, self.bins.last()?.high))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn counts_sum_to_voxel_count() {
        let slice = Array2::from_shape_fn((17, 23), |(y, x)| (y * 31 + x * 7) as f64 * 1.7 - 900.0);
        for bins in [1, 2, 7, 100, 1000] {
            let histogram = Histogram::from_slice(&slice.view(), bins);
            assert_eq!(histogram.len(), bins);
            assert_eq!(histogram.total(), slice.len() as u64, "bins = {bins}");
        }
    }

    #[test]
    fn uniform_slice_has_one_bin() {
        let slice = Array2::from_elem((4, 4), -1000.0_f64);
        let histogram = Histogram::from_slice(&slice.view(), DEFAULT_HISTOGRAM_BINS);
        assert_eq!(
            histogram.bins(),
            &[HistogramBin {
                low: -1000.0,
                high: -1000.0,
                count: 16
            }]
        );
        assert_eq!(histogram.total(), 16);
    }

    #[test]
    fn edges_span_min_to_max() {
        let slice = array![[0.0_f64, 10.0], [5.0, 10.0]];
        let histogram = Histogram::from_slice(&slice.view(), 2);
        assert_eq!(histogram.range(), Some((0.0, 10.0)));
        let bins = histogram.bins();
        assert_eq!((bins[0].low, bins[0].high, bins[0].count), (0.0, 5.0, 1));
        // the maximum lands in the last bin
        assert_eq!((bins[1].low, bins[1].high, bins[1].count), (5.0, 10.0, 3));
    }

    #[test]
    fn non_finite_values_are_counted_apart() {
        let slice = array![[1.0_f64, f64::INFINITY], [2.0, f64::NAN]];
        let histogram = Histogram::from_slice(&slice.view(), 4);
        assert_eq!(histogram.non_finite(), 2);
        assert_eq!(histogram.range(), Some((1.0, 2.0)));
        assert_eq!(histogram.total(), 4);

        let nothing_finite = array![[f64::NAN, f64::NEG_INFINITY]];
        let histogram = Histogram::from_slice(&nothing_finite.view(), 4);
        assert!(histogram.is_empty());
        assert_eq!(histogram.total(), 2);
    }

    #[test]
    fn zero_bins_is_one_bin() {
        let slice = array![[1.0_f64, 2.0, 3.0]];
        let histogram = Histogram::from_slice(&slice.view(), 0);
        assert_eq!(histogram.len(), 1);
        assert_eq!(histogram.total(), 3);
    }

    #[test]
    fn empty_input_has_no_bins() {
        let histogram = Histogram::from_values(&[] as &[f64], 10);
        assert!(histogram.is_empty());
        assert_eq!(histogram.range(), None);
    }
}
