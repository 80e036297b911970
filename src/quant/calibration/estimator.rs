//! Range estimator
//!
//! The `RangeEstimator` owns per-tensor statistics for one calibration run and
//! moves through `Accumulating -> Finalized` exactly once.

use super::stats::{FixedHistogram, MinMaxStats, TensorStats};
use super::types::{validate_percentile, Range, TensorRange};
use crate::data::Shard;
use crate::model::{ActivationModel, Activations};
use calibrar_common::{CalibrarError, Result};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
enum Policy {
    MinMax,
    Percentile { percentile: f64, num_bins: usize, bounds: TensorRange },
}

#[derive(Clone, Debug, PartialEq)]
enum State {
    Accumulating,
    Finalized(TensorRange),
}

/// Accumulates activation statistics shard by shard and produces a
/// [`TensorRange`] once.
#[derive(Clone, Debug)]
pub struct RangeEstimator {
    policy: Policy,
    stats: BTreeMap<String, TensorStats>,
    state: State,
    batches: usize,
}

impl RangeEstimator {
    /// Min-max policy estimator
    pub fn min_max() -> Self {
        Self::with_policy(Policy::MinMax)
    }

    /// Percentile policy estimator with histogram edges fixed by `bounds`.
    ///
    /// `bounds` must cover every tensor the model reports, normally the
    /// finalized output of a min-max pass over the same shards.
    pub fn percentile(percentile: f64, num_bins: usize, bounds: TensorRange) -> Result<Self> {
        validate_percentile(percentile)?;
        if num_bins == 0 {
            return Err(CalibrarError::config("num_bins", "must be at least 1, got 0", "Use 2048 bins"));
        }
        Ok(Self::with_policy(Policy::Percentile { percentile, num_bins, bounds }))
    }

    fn with_policy(policy: Policy) -> Self {
        Self { policy, stats: BTreeMap::new(), state: State::Accumulating, batches: 0 }
    }

    /// Empty estimator with the same policy, for independent shard workers.
    pub fn fork(&self) -> Self {
        Self::with_policy(self.policy.clone())
    }

    fn ensure_accumulating(&self, action: &str) -> Result<()> {
        match self.state {
            State::Accumulating => Ok(()),
            State::Finalized(_) => Err(CalibrarError::state(format!("{action} after finalize"))),
        }
    }

    fn new_stats(&self, tensor: &str) -> Result<TensorStats> {
        match &self.policy {
            Policy::MinMax => Ok(TensorStats::MinMax(MinMaxStats::new())),
            Policy::Percentile { num_bins, bounds, .. } => {
                let range = bounds.get(tensor).ok_or_else(|| {
                    CalibrarError::config(
                        "calibration_method",
                        format!("no histogram bounds for activation '{tensor}'"),
                        "Derive percentile bounds from a min-max pass over the same model",
                    )
                })?;
                Ok(TensorStats::Histogram(FixedHistogram::new(*range, *num_bins)))
            }
        }
    }

    /// Fold one batch of activations into the running statistics.
    pub fn observe(&mut self, activations: &Activations) -> Result<()> {
        self.ensure_accumulating("observe")?;
        // Nothing is folded in unless every tensor has statistics.
        let fresh = activations
            .keys()
            .filter(|name| !self.stats.contains_key(*name))
            .map(|name| -> Result<(String, TensorStats)> {
                Ok((name.clone(), self.new_stats(name)?))
            })
            .collect::<Result<Vec<_>>>()?;
        self.stats.extend(fresh);
        for (name, values) in activations {
            if let Some(stats) = self.stats.get_mut(name) {
                stats.observe(values);
            }
        }
        self.batches += 1;
        Ok(())
    }

    /// Run `model` over every batch of `shard` and observe the activations.
    pub fn update(
        &mut self,
        model: &dyn ActivationModel,
        shard: &Shard<'_>,
        batch_size: usize,
    ) -> Result<()> {
        self.ensure_accumulating("update")?;
        for batch in shard.batches(batch_size) {
            let activations = model.forward(&batch?)?;
            self.observe(&activations)?;
        }
        tracing::debug!(
            shard = shard.index(),
            of = shard.shard_count(),
            samples = shard.len(),
            "shard accumulated"
        );
        Ok(())
    }

    /// Fold another same-policy accumulator into this one.
    pub fn merge(&mut self, other: RangeEstimator) -> Result<()> {
        self.ensure_accumulating("merge")?;
        other.ensure_accumulating("merge of an estimator")?;
        if self.policy != other.policy {
            return Err(CalibrarError::state("cannot merge estimators with different policies"));
        }
        for (name, stats) in other.stats {
            match self.stats.get_mut(&name) {
                Some(existing) => existing.merge(&stats)?,
                None => {
                    self.stats.insert(name, stats);
                }
            }
        }
        self.batches += other.batches;
        Ok(())
    }

    /// Compute final ranges and freeze the estimator.
    pub fn finalize(&mut self) -> Result<TensorRange> {
        self.ensure_accumulating("finalize")?;
        let ranges: TensorRange = self
            .stats
            .iter()
            .map(|(name, stats)| (name.clone(), self.final_range(name, stats)))
            .collect();
        self.stats.clear();
        self.state = State::Finalized(ranges.clone());
        tracing::debug!(tensors = ranges.len(), batches = self.batches, "estimator finalized");
        Ok(ranges)
    }

    fn final_range(&self, name: &str, stats: &TensorStats) -> Range {
        let range = match (stats, &self.policy) {
            (TensorStats::MinMax(s), _) => s.range(),
            (TensorStats::Histogram(h), Policy::Percentile { percentile, .. }) => {
                (h.total() > 0).then(|| h.percentile_range(*percentile))
            }
            (TensorStats::Histogram(_), Policy::MinMax) => None,
        };
        range.unwrap_or_else(|| {
            tracing::warn!(tensor = name, "no finite values observed, using [0, 0]");
            Range::new(0.0, 0.0)
        })
    }

    /// Finalized ranges, readable any time after [`Self::finalize`]
    pub fn ranges(&self) -> Option<&TensorRange> {
        match &self.state {
            State::Finalized(ranges) => Some(ranges),
            State::Accumulating => None,
        }
    }

    /// Whether [`Self::finalize`] has run
    pub fn is_finalized(&self) -> bool {
        matches!(self.state, State::Finalized(_))
    }

    /// Batches observed so far
    pub fn batches_seen(&self) -> usize {
        self.batches
    }
}
