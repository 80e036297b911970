//! Floating-point model access for calibration
//!
//! Calibration only needs one capability from the model: run a batch forward
//! and report every named intermediate activation.

mod export;
mod mlp;


use crate::data::Sample;
use calibrar_common::Result;
use std::collections::BTreeMap;

pub use export::{resolve_model_path, ModelExporter, SafetensorsExporter, MODEL_FILE};
pub use mlp::{DenseLayer, MlpModel, INPUT_ACTIVATION, LOGITS_ACTIVATION};
pub(crate) use mlp::stack_batch;

/// Activation tensor name to the flattened values observed for one batch.
pub type Activations = BTreeMap<String, Vec<f32>>;

/// A model whose forward pass exposes named activations.
///
/// Shared read-only across shard workers.
pub trait ActivationModel: Sync {
    /// Names of every activation `forward` reports, in graph order.
    fn activation_names(&self) -> Vec<String>;

    /// Run one batch forward.
    fn forward(&self, batch: &[Sample]) -> Result<Activations>;
}
