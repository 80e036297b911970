//! Dense ReLU network stored as SafeTensors

use super::{ActivationModel, Activations};
use crate::data::Sample;
use calibrar_common::{CalibrarError, Result};
use ndarray::{Array1, Array2};
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Name of the model input activation.
pub const INPUT_ACTIVATION: &str = "input";
/// Name of the final layer output.
pub const LOGITS_ACTIVATION: &str = "logits";

const INPUT_SHAPE_KEY: &str = "input_shape";
const LABEL2ID_KEY: &str = "label2id";

/// One fully connected layer, `y = x W^T + b`.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseLayer {
    /// Weight matrix `[out_features, in_features]`
    pub weight: Array2<f32>,
    /// Bias `[out_features]`
    pub bias: Array1<f32>,
}

impl DenseLayer {
    /// Create a layer, checking that bias matches the output dimension.
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weight.nrows() != bias.len() {
            return Err(CalibrarError::ShapeMismatch {
                expected: vec![weight.nrows()],
                actual: vec![bias.len()],
            });
        }
        Ok(Self { weight, bias })
    }

    /// Input features
    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    /// Output features
    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }
}

/// Floating-point image classifier: flatten, then dense layers with ReLU
/// between them and raw logits at the end.
#[derive(Clone, Debug, PartialEq)]
pub struct MlpModel {
    layers: Vec<DenseLayer>,
    input_shape: Vec<usize>,
    label2id: BTreeMap<String, usize>,
}

impl MlpModel {
    /// Assemble a model, checking that layer dimensions chain.
    pub fn new(
        layers: Vec<DenseLayer>,
        input_shape: Vec<usize>,
        label2id: BTreeMap<String, usize>,
    ) -> Result<Self> {
        if layers.is_empty() {
            return Err(CalibrarError::serialization("model has no layers"));
        }
        let mut width: usize = input_shape.iter().product();
        for layer in &layers {
            if layer.in_features() != width {
                return Err(CalibrarError::ShapeMismatch {
                    expected: vec![width],
                    actual: vec![layer.in_features()],
                });
            }
            width = layer.out_features();
        }
        Ok(Self { layers, input_shape, label2id })
    }

    /// Load from a SafeTensors file with `layers.{i}.weight` / `layers.{i}.bias`
    /// tensors and `input_shape` / `label2id` JSON metadata.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CalibrarError::ModelNotFound { path: path.to_path_buf() });
        }
        let data = std::fs::read(path)
            .map_err(|e| CalibrarError::io(format!("reading SafeTensors file: {}", path.display()), e))?;

        let invalid = |e: safetensors::SafeTensorError| {
            CalibrarError::serialization(format!("invalid SafeTensors file {}: {e}", path.display()))
        };
        let (_, header) = SafeTensors::read_metadata(&data).map_err(invalid)?;
        let tensors = SafeTensors::deserialize(&data).map_err(invalid)?;

        let empty = HashMap::new();
        let metadata = header.metadata().as_ref().unwrap_or(&empty);
        let input_shape: Vec<usize> = parse_metadata(metadata, INPUT_SHAPE_KEY)?;
        let label2id: BTreeMap<String, usize> = match metadata.get(LABEL2ID_KEY) {
            Some(_) => parse_metadata(metadata, LABEL2ID_KEY)?,
            None => BTreeMap::new(),
        };

        let mut layers = Vec::new();
        loop {
            let i = layers.len();
            let weight_name = format!("layers.{i}.weight");
            if !tensors.names().iter().any(|n| **n == weight_name) {
                break;
            }
            let (weight, weight_shape) = read_f32(&tensors, &weight_name)?;
            let (bias, _) = read_f32(&tensors, &format!("layers.{i}.bias"))?;
            let &[rows, cols] = weight_shape.as_slice() else {
                return Err(CalibrarError::ShapeMismatch { expected: vec![0, 0], actual: weight_shape.clone() });
            };
            let weight = Array2::from_shape_vec((rows, cols), weight)
                .map_err(|e| CalibrarError::serialization(format!("{weight_name}: {e}")))?;
            layers.push(DenseLayer::new(weight, Array1::from_vec(bias))?);
        }

        tracing::debug!(path = %path.display(), layers = layers.len(), "loaded model");
        Self::new(layers, input_shape, label2id)
    }

    /// Write the model to a SafeTensors file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = self
            .layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| {
                let weight: Vec<f32> = layer.weight.iter().copied().collect();
                [
                    (
                        format!("layers.{i}.weight"),
                        vec![layer.out_features(), layer.in_features()],
                        bytemuck::cast_slice(&weight).to_vec(),
                    ),
                    (
                        format!("layers.{i}.bias"),
                        vec![layer.out_features()],
                        bytemuck::cast_slice(&layer.bias.to_vec()).to_vec(),
                    ),
                ]
            })
            .collect();

        let views = buffers
            .iter()
            .map(|(name, shape, bytes)| {
                TensorView::new(Dtype::F32, shape.clone(), bytes)
                    .map(|view| (name.as_str(), view))
                    .map_err(|e| CalibrarError::serialization(format!("{name}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let metadata = HashMap::from([
            (INPUT_SHAPE_KEY.to_string(), to_json(&self.input_shape)?),
            (LABEL2ID_KEY.to_string(), to_json(&self.label2id)?),
        ]);

        let bytes = safetensors::serialize(views, Some(metadata))
            .map_err(|e| CalibrarError::serialization(format!("serializing model: {e}")))?;
        std::fs::write(path, bytes)
            .map_err(|e| CalibrarError::io(format!("writing {}", path.display()), e))
    }

    /// Dense layers in order
    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    /// Per-sample input shape, e.g. `[C, H, W]`
    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    /// Label name to class id
    pub fn label2id(&self) -> &BTreeMap<String, usize> {
        &self.label2id
    }

    /// Number of output classes
    pub fn num_labels(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::out_features)
    }

    /// Activation name produced by layer `index`.
    pub fn layer_output_name(&self, index: usize) -> String {
        if index + 1 == self.layers.len() {
            LOGITS_ACTIVATION.to_string()
        } else {
            format!("layers.{index}.output")
        }
    }
}

/// Stack a batch of samples into a `[B, features]` matrix.
pub(crate) fn stack_batch(batch: &[Sample], input_shape: &[usize]) -> Result<Array2<f32>> {
    let features: usize = input_shape.iter().product();
    let mut flat = Vec::with_capacity(batch.len() * features);
    for sample in batch {
        if sample.shape() != input_shape {
            return Err(CalibrarError::ShapeMismatch {
                expected: input_shape.to_vec(),
                actual: sample.shape().to_vec(),
            });
        }
        flat.extend_from_slice(sample.data());
    }
    Array2::from_shape_vec((batch.len(), features), flat)
        .map_err(|e| CalibrarError::serialization(format!("stacking batch: {e}")))
}

impl ActivationModel for MlpModel {
    fn activation_names(&self) -> Vec<String> {
        std::iter::once(INPUT_ACTIVATION.to_string())
            .chain((0..self.layers.len()).map(|i| self.layer_output_name(i)))
            .collect()
    }

    fn forward(&self, batch: &[Sample]) -> Result<Activations> {
        let mut x = stack_batch(batch, &self.input_shape)?;
        let mut activations = Activations::new();
        activations.insert(INPUT_ACTIVATION.to_string(), x.iter().copied().collect());

        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            x = x.dot(&layer.weight.t()) + &layer.bias;
            if i != last {
                x.mapv_inplace(|v| v.max(0.0));
            }
            activations.insert(self.layer_output_name(i), x.iter().copied().collect());
        }
        Ok(activations)
    }
}

fn parse_metadata<T: serde::de::DeserializeOwned>(
    metadata: &HashMap<String, String>,
    key: &str,
) -> Result<T> {
    let raw = metadata.get(key).ok_or_else(|| {
        CalibrarError::serialization(format!("model metadata is missing '{key}'"))
    })?;
    serde_json::from_str(raw)
        .map_err(|e| CalibrarError::serialization(format!("model metadata '{key}': {e}")))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CalibrarError::serialization(e.to_string()))
}

fn read_f32(tensors: &SafeTensors<'_>, name: &str) -> Result<(Vec<f32>, Vec<usize>)> {
    let tensor = tensors
        .tensor(name)
        .map_err(|e| CalibrarError::serialization(format!("failed to read tensor '{name}': {e}")))?;
    if tensor.dtype() != Dtype::F32 {
        return Err(CalibrarError::serialization(format!(
            "tensor '{name}' has dtype {:?}, expected F32",
            tensor.dtype()
        )));
    }
    let values = tensor
        .data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((values, tensor.shape().to_vec()))
}
