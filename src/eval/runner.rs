//! Batched evaluation of an inference engine over a labeled split

use super::labels::{align_labels, LabelMappingWarning};
use super::metric::{Accuracy, MetricService};
use crate::data::{shuffled_indices, Preprocessor, RecordSet, Sample};
use calibrar_common::{CalibrarError, Result};
use std::collections::BTreeMap;
use std::time::Instant;

/// Prefix applied to every reported metric key.
pub const METRIC_PREFIX: &str = "eval_";

/// Runs batched inference and reports predictions as class ids.
pub trait InferenceEngine: Sync {
    /// Argmax class id for every sample of the batch, in order.
    fn predict(&self, batch: &[Sample]) -> Result<Vec<usize>>;

    /// Label name to class id, as declared by the model.
    fn label2id(&self) -> &BTreeMap<String, usize>;
}

/// Metrics of one evaluation run.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationOutcome {
    /// Metric name to value, keys prefixed with `eval_`
    pub metrics: BTreeMap<String, f64>,
    /// Set when dataset labels could not be aligned with the model
    pub warning: Option<LabelMappingWarning>,
}

impl EvaluationOutcome {
    /// Look up a metric by its unprefixed name.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(&format!("{METRIC_PREFIX}{name}")).copied()
    }
}

/// Evaluation runner
pub struct EvaluationRunner {
    metric: Box<dyn MetricService>,
    batch_size: usize,
    max_eval_samples: Option<usize>,
    seed: u64,
}

impl Default for EvaluationRunner {
    fn default() -> Self {
        Self::new(Accuracy)
    }
}

impl EvaluationRunner {
    /// Runner computing `metric`, batch size 1, no sample limit.
    pub fn new(metric: impl MetricService + 'static) -> Self {
        Self { metric: Box::new(metric), batch_size: 1, max_eval_samples: None, seed: 42 }
    }

    /// Set the inference batch size (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Evaluate a seeded shuffled subset of at most `limit` records.
    pub fn with_max_samples(mut self, limit: Option<usize>, seed: u64) -> Self {
        self.max_eval_samples = limit;
        self.seed = seed;
        self
    }

    fn eval_indices(&self, len: usize) -> Vec<usize> {
        match self.max_eval_samples {
            Some(limit) if limit < len => {
                let mut indices = shuffled_indices(len, self.seed);
                indices.truncate(limit);
                indices
            }
            _ => (0..len).collect(),
        }
    }

    /// Run `engine` over `records` and compute metrics.
    ///
    /// Every record must carry a label. A label mapping that cannot be
    /// aligned is reported through the outcome and does not stop the run.
    pub fn run(
        &self,
        engine: &dyn InferenceEngine,
        records: &dyn RecordSet,
        preprocessor: &dyn Preprocessor,
    ) -> Result<EvaluationOutcome> {
        let start = Instant::now();

        let (remap, warning) = match align_labels(engine.label2id(), records.label_names()) {
            Ok(remap) => (Some(remap), None),
            Err(warning) => {
                tracing::warn!("{warning}");
                (None, Some(warning))
            }
        };

        let indices = self.eval_indices(records.len());
        let mut predictions = Vec::with_capacity(indices.len());
        let mut references = Vec::with_capacity(indices.len());

        for chunk in indices.chunks(self.batch_size) {
            let mut batch = Vec::with_capacity(chunk.len());
            for &index in chunk {
                let record = records.get(index)?;
                let label = record.label.ok_or_else(|| CalibrarError::DatasetFormat {
                    message: format!("record {index} has no label"),
                })?;
                let reference = match &remap {
                    Some(table) => *table.get(label).ok_or_else(|| CalibrarError::DatasetFormat {
                        message: format!("record {index} has label {label} outside the declared classes"),
                    })?,
                    None => label,
                };
                references.push(reference);
                batch.push(preprocessor.preprocess(&record)?);
            }
            predictions.extend(engine.predict(&batch)?);
        }

        if predictions.len() != references.len() {
            return Err(CalibrarError::ShapeMismatch {
                expected: vec![references.len()],
                actual: vec![predictions.len()],
            });
        }

        let mut metrics: BTreeMap<String, f64> = self
            .metric
            .compute(&predictions, &references)
            .into_iter()
            .map(|(k, v)| (format!("{METRIC_PREFIX}{k}"), v))
            .collect();
        metrics.insert(format!("{METRIC_PREFIX}samples"), references.len() as f64);
        metrics.insert(format!("{METRIC_PREFIX}runtime"), start.elapsed().as_secs_f64());

        tracing::info!(samples = references.len(), ?metrics, "evaluation complete");
        Ok(EvaluationOutcome { metrics, warning })
    }
}
