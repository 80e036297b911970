//! Evaluation of the quantized artifact
//!
//! - `metric`: metric service trait and accuracy
//! - `labels`: aligning dataset label ids with the model's label mapping
//! - `runner`: batched inference over a held-out split
//! - `report`: `eval_results.json`

mod labels;
mod metric;
mod report;
mod runner;


pub use labels::{align_labels, LabelMappingWarning};
pub use metric::{Accuracy, MetricService};
pub use report::{report_json, write_report, EVAL_RESULTS_FILE};
pub use runner::{EvaluationOutcome, EvaluationRunner, InferenceEngine, METRIC_PREFIX};
