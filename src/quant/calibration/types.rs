//! Type definitions for range calibration
//!
//! Contains the policy configuration and the finalized range mapping.

use calibrar_common::{CalibrarError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Default upper percentile for the percentile policy
pub const DEFAULT_PERCENTILE: f64 = 99.999;
/// Default histogram resolution for the percentile policy
pub const DEFAULT_NUM_BINS: usize = 2048;

/// Calibration method as named in configuration files
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationMethod {
    /// Observed min/max
    #[default]
    #[serde(rename = "minmax_asym")]
    MinMaxAsym,
    /// Percentile bounds from a fixed-edge histogram
    #[serde(rename = "percentile_asym")]
    PercentileAsym,
}

impl FromStr for CalibrationMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minmax_asym" | "minmax" | "min-max" => Ok(Self::MinMaxAsym),
            "percentile_asym" | "percentile" => Ok(Self::PercentileAsym),
            _ => Err(format!(
                "Unknown calibration method: {s}. Valid methods: minmax_asym, percentile_asym"
            )),
        }
    }
}

impl fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinMaxAsym => write!(f, "minmax_asym"),
            Self::PercentileAsym => write!(f, "percentile_asym"),
        }
    }
}

/// Range estimation policy. Validated at construction.
#[derive(Clone, Debug, PartialEq)]
pub enum CalibrationConfig {
    /// Running min/max per tensor
    MinMaxAsymmetric,
    /// Percentile bounds over a histogram of `num_bins` equal-width bins
    PercentileAsymmetric {
        /// Upper percentile in (0, 100]; the lower bound uses `100 - percentile`
        percentile: f64,
        /// Histogram resolution
        num_bins: usize,
    },
}

impl CalibrationConfig {
    /// Min-max policy
    pub fn min_max() -> Self {
        Self::MinMaxAsymmetric
    }

    /// Percentile policy, rejecting percentiles outside (0, 100] and empty histograms.
    pub fn percentile(percentile: f64, num_bins: usize) -> Result<Self> {
        validate_percentile(percentile)?;
        if num_bins == 0 {
            return Err(CalibrarError::config(
                "num_bins",
                "must be at least 1, got 0",
                format!("Use the default of {DEFAULT_NUM_BINS} bins"),
            ));
        }
        Ok(Self::PercentileAsymmetric { percentile, num_bins })
    }

    /// Build from a configuration-file method plus its parameters.
    pub fn from_method(method: CalibrationMethod, percentile: f64, num_bins: usize) -> Result<Self> {
        match method {
            CalibrationMethod::MinMaxAsym => Ok(Self::min_max()),
            CalibrationMethod::PercentileAsym => Self::percentile(percentile, num_bins),
        }
    }

    /// Method name of this policy
    pub fn method(&self) -> CalibrationMethod {
        match self {
            Self::MinMaxAsymmetric => CalibrationMethod::MinMaxAsym,
            Self::PercentileAsymmetric { .. } => CalibrationMethod::PercentileAsym,
        }
    }
}

pub(crate) fn validate_percentile(percentile: f64) -> Result<()> {
    if !(percentile > 0.0 && percentile <= 100.0) {
        return Err(CalibrarError::config(
            "calibration_histogram_percentile",
            format!("must be in (0, 100], got {percentile}"),
            format!("Use {DEFAULT_PERCENTILE} to clip only extreme outliers"),
        ));
    }
    Ok(())
}

/// Asymmetric value range of one tensor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Range {
    /// Lower bound
    pub min: f32,
    /// Upper bound
    pub max: f32,
}

impl Range {
    /// Create a range
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// `max - min`
    pub fn width(&self) -> f32 {
        self.max - self.min
    }

    /// Whether `min <= max` and both bounds are finite
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

/// Finalized tensor name to [`Range`] mapping, sorted by name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TensorRange(BTreeMap<String, Range>);

impl TensorRange {
    /// Wrap a mapping
    pub fn new(ranges: BTreeMap<String, Range>) -> Self {
        Self(ranges)
    }

    /// Range of `tensor`
    pub fn get(&self, tensor: &str) -> Option<&Range> {
        self.0.get(tensor)
    }

    /// Whether `tensor` has a range
    pub fn contains(&self, tensor: &str) -> bool {
        self.0.contains_key(tensor)
    }

    /// Ranges in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Range)> {
        self.0.iter()
    }

    /// Number of tensors
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no tensor has a range
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Write as pretty JSON with sorted keys.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CalibrarError::serialization(format!("serializing ranges: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| CalibrarError::io(format!("writing {}", path.display()), e))
    }

    /// Read ranges written by [`TensorRange::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CalibrarError::io(format!("reading {}", path.display()), e))?;
        serde_json::from_str(&text)
            .map_err(|e| CalibrarError::serialization(format!("{}: {e}", path.display())))
    }
}

impl FromIterator<(String, Range)> for TensorRange {
    fn from_iter<I: IntoIterator<Item = (String, Range)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
