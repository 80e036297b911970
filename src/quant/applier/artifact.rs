//! Int8 model artifact and its simulated integer inference

use super::config::{QuantGranularity, QuantizationConfig};
use super::params::{check_bits, QuantParams, QuantizedTensor};
use crate::data::Sample;
use crate::eval::InferenceEngine;
use crate::model::{stack_batch, ActivationModel, MlpModel, INPUT_ACTIVATION};
use crate::quant::calibration::{Range, TensorRange};
use calibrar_common::{CalibrarError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// File name of the quantized artifact.
pub const QUANTIZED_MODEL_FILE: &str = "model_quantized.json";

/// Artifact layout version
pub const FORMAT_VERSION: u32 = 1;

/// One dense layer with integer weights and float bias.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizedLayer {
    /// Weight `[out_features, in_features]`
    pub weight: QuantizedTensor,
    /// Bias `[out_features]`
    pub bias: Vec<f32>,
    /// Activation this layer produces
    pub output: String,
}

/// Calibrated range and derived parameters of one activation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivationQuant {
    /// Calibrated range as estimated
    pub range: Range,
    /// Per-tensor scale and zero-point
    pub params: QuantParams,
}

/// Statically quantized MLP.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizedModel {
    /// Layout version
    pub format_version: u32,
    /// Settings the artifact was produced with
    pub config: QuantizationConfig,
    /// Per-sample input shape
    pub input_shape: Vec<usize>,
    /// Label name to class id
    pub label2id: BTreeMap<String, usize>,
    /// Dense layers in order
    pub layers: Vec<QuantizedLayer>,
    /// Activation quantization, keyed by activation name
    pub activations: BTreeMap<String, ActivationQuant>,
}

impl QuantizedModel {
    /// Quantize `model` with calibrated activation `ranges`.
    ///
    /// Every activation the model reports must have a range.
    pub fn build(model: &MlpModel, ranges: &TensorRange, config: &QuantizationConfig) -> Result<Self> {
        config.validate()?;
        let mut activations = BTreeMap::new();
        for name in model.activation_names() {
            let range = *ranges.get(&name).ok_or_else(|| CalibrarError::missing_range(&name))?;
            let params = QuantParams::from_range(range, config.activation_mode, config.bits)?;
            activations.insert(name, ActivationQuant { range, params });
        }

        let layers = model
            .layers()
            .iter()
            .enumerate()
            .map(|(i, layer)| -> Result<QuantizedLayer> {
                let values: Vec<f32> = layer.weight.iter().copied().collect();
                let shape = [layer.out_features(), layer.in_features()];
                Ok(QuantizedLayer {
                    weight: QuantizedTensor::from_values(
                        &values,
                        &shape,
                        config.weight_granularity,
                        config.weight_mode,
                        config.bits,
                    )?,
                    bias: layer.bias.to_vec(),
                    output: model.layer_output_name(i),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            format_version: FORMAT_VERSION,
            config: config.clone(),
            input_shape: model.input_shape().to_vec(),
            label2id: model.label2id().clone(),
            layers,
            activations,
        })
    }

    /// Write as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CalibrarError::serialization(format!("Failed to serialize: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| CalibrarError::io(format!("writing {}", path.display()), e))
    }

    /// Read an artifact written by [`QuantizedModel::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CalibrarError::ModelNotFound { path: path.to_path_buf() });
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| CalibrarError::io(format!("reading {}", path.display()), e))?;
        let model: Self = serde_json::from_str(&text)
            .map_err(|e| CalibrarError::serialization(format!("{}: {e}", path.display())))?;
        if model.format_version != FORMAT_VERSION {
            return Err(CalibrarError::serialization(format!(
                "unsupported artifact version {} (expected {FORMAT_VERSION})",
                model.format_version
            )));
        }
        let widths = model
            .layers
            .iter()
            .map(|l| l.weight.params.bits)
            .chain(model.activations.values().map(|a| a.params.bits));
        for bits in std::iter::once(model.config.bits).chain(widths) {
            check_bits(bits)
                .map_err(|e| CalibrarError::serialization(format!("{}: {e}", path.display())))?;
        }
        Ok(model)
    }

    /// Number of output classes
    pub fn num_labels(&self) -> usize {
        self.layers.last().map_or(0, |l| l.bias.len())
    }

    /// Weight tensors that use per-channel scales
    pub fn per_channel_layers(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| l.weight.params.granularity == QuantGranularity::PerChannel)
            .count()
    }

    fn requantize(&self, name: &str, x: &mut Array2<f32>) -> Result<()> {
        let quant = self.activations.get(name).ok_or_else(|| CalibrarError::missing_range(name))?;
        let values = x.as_slice_mut().ok_or_else(|| {
            CalibrarError::quantization(format!("activation '{name}' is not contiguous"))
        })?;
        quant.params.fake_quantize(values);
        Ok(())
    }

    /// Simulated integer forward pass: every activation is snapped to its
    /// int grid and every weight is the dequantized int8 value.
    pub fn logits(&self, batch: &[Sample]) -> Result<Array2<f32>> {
        let mut x = stack_batch(batch, &self.input_shape)?;
        self.requantize(INPUT_ACTIVATION, &mut x)?;

        let last = self.layers.len().saturating_sub(1);
        for (i, layer) in self.layers.iter().enumerate() {
            let &[rows, cols] = layer.weight.shape.as_slice() else {
                return Err(CalibrarError::quantization(format!(
                    "layer {i} weight has shape {:?}",
                    layer.weight.shape
                )));
            };
            let weight = Array2::from_shape_vec((rows, cols), layer.weight.dequantize())
                .map_err(|e| CalibrarError::quantization(format!("layer {i}: {e}")))?;
            x = x.dot(&weight.t()) + &Array1::from_vec(layer.bias.clone());
            if i != last {
                x.mapv_inplace(|v| v.max(0.0));
            }
            self.requantize(&layer.output, &mut x)?;
        }
        Ok(x)
    }
}

impl InferenceEngine for QuantizedModel {
    fn predict(&self, batch: &[Sample]) -> Result<Vec<usize>> {
        let logits = self.logits(batch)?;
        Ok(logits
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                    .0
            })
            .collect())
    }

    fn label2id(&self) -> &BTreeMap<String, usize> {
        &self.label2id
    }
}
