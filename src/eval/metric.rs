//! Evaluation metric definitions

use std::collections::BTreeMap;

/// Computes named metrics from predicted and reference class ids.
pub trait MetricService: Send + Sync {
    /// Metric name to value
    fn compute(&self, predictions: &[usize], references: &[usize]) -> BTreeMap<String, f64>;
}

/// Classification accuracy
#[derive(Clone, Copy, Debug, Default)]
pub struct Accuracy;

impl Accuracy {
    /// Fraction of positions where prediction equals reference. Zero when empty.
    pub fn score(predictions: &[usize], references: &[usize]) -> f64 {
        let total = predictions.len().min(references.len());
        if total == 0 {
            return 0.0;
        }
        let correct = predictions.iter().zip(references).filter(|(p, r)| p == r).count();
        correct as f64 / total as f64
    }
}

impl MetricService for Accuracy {
    fn compute(&self, predictions: &[usize], references: &[usize]) -> BTreeMap<String, f64> {
        BTreeMap::from([("accuracy".to_string(), Self::score(predictions, references))])
    }
}
