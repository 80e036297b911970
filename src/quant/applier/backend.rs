//! Quantization backends and the applier that guards them

use super::artifact::{QuantizedModel, QUANTIZED_MODEL_FILE};
use super::config::QuantizationConfig;
use crate::model::MlpModel;
use crate::quant::calibration::TensorRange;
use calibrar_common::{CalibrarError, Result};
use std::path::{Path, PathBuf};

/// Rewrites a floating-point model into a quantized artifact.
pub trait QuantizationBackend: Send + Sync {
    /// File name the backend writes inside `save_dir`.
    fn artifact_name(&self) -> &str;

    /// Produce the artifact and return its path.
    fn quantize(
        &self,
        model_path: &Path,
        ranges: &TensorRange,
        config: &QuantizationConfig,
        save_dir: &Path,
    ) -> Result<PathBuf>;
}

/// Static int8 backend writing `model_quantized.json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Int8Backend;

impl QuantizationBackend for Int8Backend {
    fn artifact_name(&self) -> &str {
        QUANTIZED_MODEL_FILE
    }

    fn quantize(
        &self,
        model_path: &Path,
        ranges: &TensorRange,
        config: &QuantizationConfig,
        save_dir: &Path,
    ) -> Result<PathBuf> {
        let model = MlpModel::load(model_path)?;
        let quantized = QuantizedModel::build(&model, ranges, config)?;

        std::fs::create_dir_all(save_dir)
            .map_err(|e| CalibrarError::io(format!("creating {}", save_dir.display()), e))?;
        let path = save_dir.join(self.artifact_name());
        quantized.save(&path)?;

        let bytes: usize = quantized.layers.iter().map(|l| l.weight.memory_bytes()).sum();
        tracing::info!(
            path = %path.display(),
            layers = quantized.layers.len(),
            per_channel = quantized.per_channel_layers(),
            activations = quantized.activations.len(),
            weight_bytes = bytes,
            "quantized model written"
        );
        Ok(path)
    }
}

/// Applies calibrated ranges through a backend with a strict orphan policy.
pub struct QuantizationApplier {
    backend: Box<dyn QuantizationBackend>,
}

impl Default for QuantizationApplier {
    fn default() -> Self {
        Self::new(Int8Backend)
    }
}

impl QuantizationApplier {
    /// Wrap a backend
    pub fn new(backend: impl QuantizationBackend + 'static) -> Self {
        Self { backend: Box::new(backend) }
    }

    /// Quantize the model at `model_path`.
    ///
    /// Fails without writing anything if a tensor in `graph_tensors` has no
    /// range. Backend failures surface as quantization errors after any
    /// partial artifact has been removed.
    pub fn apply(
        &self,
        model_path: &Path,
        graph_tensors: &[String],
        ranges: &TensorRange,
        config: &QuantizationConfig,
        save_dir: &Path,
    ) -> Result<PathBuf> {
        config.validate()?;
        if let Some(orphan) = graph_tensors.iter().find(|t| !ranges.contains(t)) {
            return Err(CalibrarError::missing_range(orphan.as_str()));
        }

        let artifact = save_dir.join(self.backend.artifact_name());
        self.backend
            .quantize(model_path, ranges, config, save_dir)
            .map_err(|err| {
                if artifact.exists() {
                    if let Err(e) = std::fs::remove_file(&artifact) {
                        tracing::warn!(path = %artifact.display(), error = %e, "could not remove partial artifact");
                    }
                }
                match err {
                    CalibrarError::Quantization { .. } => err,
                    other => CalibrarError::quantization(other.to_string()),
                }
            })
    }
}
