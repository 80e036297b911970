//! Quantization applier
//!
//! Turns calibrated activation ranges plus a [`QuantizationConfig`] into a
//! quantized artifact through a [`QuantizationBackend`]:
//! - **Weights**: int8, symmetric or asymmetric, per-tensor or per-channel
//! - **Activations**: per-tensor scale/zero-point from the calibrated range

mod artifact;
mod backend;
mod config;
mod params;


pub use artifact::{
    ActivationQuant, QuantizedLayer, QuantizedModel, FORMAT_VERSION, QUANTIZED_MODEL_FILE,
};
pub use backend::{Int8Backend, QuantizationApplier, QuantizationBackend};
pub use config::{QuantGranularity, QuantMode, QuantizationConfig};
pub use params::{check_bits, QuantParams, QuantizedTensor, MIN_SCALE, SUPPORTED_BITS};
