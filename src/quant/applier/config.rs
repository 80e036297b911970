//! Quantization configuration passed through to the backend

use super::params::check_bits;
use calibrar_common::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quantization mode: symmetric or asymmetric
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantMode {
    /// Symmetric: zero-point = 0, range = [-max_abs, max_abs]
    Symmetric,
    /// Asymmetric: zero-point != 0, range = [min, max]
    Asymmetric,
}

impl FromStr for QuantMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "symmetric" | "sym" => Ok(Self::Symmetric),
            "asymmetric" | "asym" => Ok(Self::Asymmetric),
            _ => Err(format!("Unknown quantization mode: {s}. Valid modes: symmetric, asymmetric")),
        }
    }
}

impl fmt::Display for QuantMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symmetric => write!(f, "symmetric"),
            Self::Asymmetric => write!(f, "asymmetric"),
        }
    }
}

/// Weight quantization granularity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantGranularity {
    /// Single scale/zero-point for the entire tensor
    PerTensor,
    /// Separate scale/zero-point per output channel (axis 0)
    #[default]
    PerChannel,
}

impl FromStr for QuantGranularity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "per_tensor" | "tensor" => Ok(Self::PerTensor),
            "per_channel" | "channel" => Ok(Self::PerChannel),
            _ => Err(format!("Unknown granularity: {s}. Valid values: per_tensor, per_channel")),
        }
    }
}

fn default_weight_mode() -> QuantMode {
    QuantMode::Symmetric
}

fn default_activation_mode() -> QuantMode {
    QuantMode::Asymmetric
}

fn default_bits() -> u8 {
    8
}

/// Backend quantization settings. The estimator never reads these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Weight scheme
    #[serde(default = "default_weight_mode")]
    pub weight_mode: QuantMode,
    /// Weight scale granularity
    #[serde(default)]
    pub weight_granularity: QuantGranularity,
    /// Activation scheme
    #[serde(default = "default_activation_mode")]
    pub activation_mode: QuantMode,
    /// Integer bit width
    #[serde(default = "default_bits")]
    pub bits: u8,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            weight_mode: default_weight_mode(),
            weight_granularity: QuantGranularity::default(),
            activation_mode: default_activation_mode(),
            bits: default_bits(),
        }
    }
}

impl QuantizationConfig {
    /// Reject bit widths the int8 artifact cannot hold.
    pub fn validate(&self) -> Result<()> {
        check_bits(self.bits)
    }
}
