//! Staging the floating-point model into the output directory

use super::mlp::MlpModel;
use calibrar_common::{CalibrarError, Result};
use std::path::{Path, PathBuf};

/// File name of the staged floating-point model.
pub const MODEL_FILE: &str = "model.safetensors";

/// Produces a file-based model the quantizer can consume.
pub trait ModelExporter {
    /// Export `model_id` into `output_dir` for the given batch input/output
    /// shapes, returning the written model path.
    fn export(
        &self,
        model_id: &str,
        output_dir: &Path,
        input_shape: &[usize],
        output_shape: &[usize],
    ) -> Result<PathBuf>;
}

/// Resolve a model id to a local SafeTensors file.
///
/// Accepts a file path or a directory containing `model.safetensors`.
pub fn resolve_model_path(model_id: &str) -> Result<PathBuf> {
    let path = Path::new(model_id);
    if path.is_dir() {
        let file = path.join(MODEL_FILE);
        if file.exists() {
            return Ok(file);
        }
        return Err(CalibrarError::ModelNotFound { path: file });
    }
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    Err(CalibrarError::ModelNotFound { path: path.to_path_buf() })
}

/// Validates a SafeTensors MLP against the expected shapes and writes it to
/// `output_dir/model.safetensors`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SafetensorsExporter;

impl SafetensorsExporter {
    /// Create an exporter
    pub fn new() -> Self {
        Self
    }
}

impl ModelExporter for SafetensorsExporter {
    fn export(
        &self,
        model_id: &str,
        output_dir: &Path,
        input_shape: &[usize],
        output_shape: &[usize],
    ) -> Result<PathBuf> {
        let source = resolve_model_path(model_id)?;
        let model = MlpModel::load(&source)?;

        if input_shape.len() < 2 || &input_shape[1..] != model.input_shape() {
            return Err(CalibrarError::ShapeMismatch {
                expected: [&[input_shape.first().copied().unwrap_or(1)][..], model.input_shape()].concat(),
                actual: input_shape.to_vec(),
            });
        }
        if output_shape.len() != 2 || output_shape[1] != model.num_labels() {
            return Err(CalibrarError::ShapeMismatch {
                expected: vec![output_shape.first().copied().unwrap_or(1), model.num_labels()],
                actual: output_shape.to_vec(),
            });
        }

        std::fs::create_dir_all(output_dir)
            .map_err(|e| CalibrarError::io(format!("creating {}", output_dir.display()), e))?;
        let target = output_dir.join(MODEL_FILE);
        model.save(&target)?;

        tracing::info!(
            source = %source.display(),
            target = %target.display(),
            input = ?input_shape,
            output = ?output_shape,
            "exported model"
        );
        Ok(target)
    }
}
