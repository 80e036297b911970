//! Per-tensor statistics accumulators
//!
//! Both accumulators merge exactly: min/max is commutative and the histogram
//! adds integer counts over edges fixed before the first update.

use super::types::Range;
use calibrar_common::{CalibrarError, Result};

/// Running minimum and maximum. NaN values are skipped.
#[derive(Clone, Debug, PartialEq)]
pub struct MinMaxStats {
    min: f32,
    max: f32,
    count: u64,
}

impl Default for MinMaxStats {
    fn default() -> Self {
        Self::new()
    }
}

impl MinMaxStats {
    /// Empty accumulator
    pub fn new() -> Self {
        Self { min: f32::INFINITY, max: f32::NEG_INFINITY, count: 0 }
    }

    /// Extend with a batch of values.
    pub fn observe(&mut self, data: &[f32]) {
        for &v in data.iter().filter(|v| !v.is_nan()) {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
            self.count += 1;
        }
    }

    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: &Self) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count += other.count;
    }

    /// Number of non-NaN values seen
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Observed range, or `None` before any value
    pub fn range(&self) -> Option<Range> {
        (self.count > 0).then(|| Range::new(self.min, self.max))
    }
}

/// Histogram with equal-width bins over fixed `[lo, hi]` edges.
#[derive(Clone, Debug, PartialEq)]
pub struct FixedHistogram {
    lo: f32,
    hi: f32,
    counts: Vec<u64>,
    total: u64,
}

impl FixedHistogram {
    /// Create an empty histogram of `num_bins` bins over `bounds`.
    pub fn new(bounds: Range, num_bins: usize) -> Self {
        Self { lo: bounds.min, hi: bounds.max, counts: vec![0; num_bins.max(1)], total: 0 }
    }

    /// Number of bins
    pub fn num_bins(&self) -> usize {
        self.counts.len()
    }

    /// Total counted values
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bin counts
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    fn bin_width(&self) -> f64 {
        (f64::from(self.hi) - f64::from(self.lo)) / self.counts.len() as f64
    }

    fn bin_of(&self, value: f32) -> usize {
        let width = self.bin_width();
        if width <= 0.0 {
            return 0;
        }
        let pos = (f64::from(value) - f64::from(self.lo)) / width;
        if pos <= 0.0 {
            0
        } else {
            (pos as usize).min(self.counts.len() - 1)
        }
    }

    /// Count a batch of values. Out-of-bounds values land in the edge bins.
    pub fn observe(&mut self, data: &[f32]) {
        for &v in data.iter().filter(|v| !v.is_nan()) {
            let bin = self.bin_of(v);
            self.counts[bin] += 1;
            self.total += 1;
        }
    }

    /// Add another histogram's counts bin-wise. Edges must match.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if self.counts.len() != other.counts.len()
            || self.lo.to_bits() != other.lo.to_bits()
            || self.hi.to_bits() != other.hi.to_bits()
        {
            return Err(CalibrarError::state(format!(
                "cannot merge histograms with different edges ([{}, {}] x {} vs [{}, {}] x {})",
                self.lo,
                self.hi,
                self.counts.len(),
                other.lo,
                other.hi,
                other.counts.len()
            )));
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        self.total += other.total;
        Ok(())
    }

    /// Value at quantile `q` percent, by cumulative count walk with linear
    /// interpolation inside the bin, clamped to `[lo, hi]`.
    pub fn quantile(&self, q: f64) -> f32 {
        let width = self.bin_width();
        if self.total == 0 || width <= 0.0 {
            return self.lo;
        }
        let target = (q / 100.0).clamp(0.0, 1.0) * self.total as f64;
        let lo = f64::from(self.lo);

        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let next = cumulative + count;
            if next as f64 >= target {
                let frac = ((target - cumulative as f64) / count as f64).clamp(0.0, 1.0);
                let value = lo + (i as f64 + frac) * width;
                return (value as f32).clamp(self.lo, self.hi);
            }
            cumulative = next;
        }
        self.hi
    }

    /// Lower and upper bounds for `percentile`: the `100 - percentile` and
    /// `percentile` quantiles, ordered so that `min <= max`.
    pub fn percentile_range(&self, percentile: f64) -> Range {
        let a = self.quantile(100.0 - percentile);
        let b = self.quantile(percentile);
        Range::new(a.min(b), a.max(b))
    }
}

/// Accumulator for one activation tensor.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorStats {
    /// Min-max policy state
    MinMax(MinMaxStats),
    /// Percentile policy state
    Histogram(FixedHistogram),
}

impl TensorStats {
    /// Extend with a batch of values.
    pub fn observe(&mut self, data: &[f32]) {
        match self {
            Self::MinMax(stats) => stats.observe(data),
            Self::Histogram(hist) => hist.observe(data),
        }
    }

    /// Fold a same-policy accumulator into this one.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        match (self, other) {
            (Self::MinMax(a), Self::MinMax(b)) => {
                a.merge(b);
                Ok(())
            }
            (Self::Histogram(a), Self::Histogram(b)) => a.merge(b),
            _ => Err(CalibrarError::state("cannot merge min-max and histogram statistics")),
        }
    }
}
