//! Scale/zero-point computation and integer (de)quantization

use super::config::{QuantGranularity, QuantMode};
use crate::quant::calibration::Range;
use calibrar_common::{CalibrarError, Result};
use serde::{Deserialize, Serialize};

/// Smallest scale ever emitted; keeps zero-width ranges from dividing by zero.
pub const MIN_SCALE: f32 = 1e-10;

/// Bit widths an `i8` artifact can hold.
pub const SUPPORTED_BITS: std::ops::RangeInclusive<u8> = 2..=8;

/// Reject widths outside [`SUPPORTED_BITS`].
pub fn check_bits(bits: u8) -> Result<()> {
    if SUPPORTED_BITS.contains(&bits) {
        Ok(())
    } else {
        Err(CalibrarError::config(
            "quantization.bits",
            format!("must be between 2 and 8, got {bits}"),
            "Use 8 bits for int8 static quantization",
        ))
    }
}

/// Signed integer limits for `bits`. Callers check the width first.
pub(crate) fn qrange(bits: u8) -> (i32, i32) {
    let qmax = (1i32 << (bits - 1)) - 1;
    (-qmax - 1, qmax)
}

/// Scale and zero-point for one range.
///
/// The range is widened to include 0.0 so that zero maps to an exact
/// integer.
pub(crate) fn scale_zero_point(range: Range, mode: QuantMode, bits: u8) -> (f32, i32) {
    let (qmin, qmax) = qrange(bits);
    let lo = range.min.min(0.0);
    let hi = range.max.max(0.0);

    match mode {
        QuantMode::Symmetric => {
            let max_abs = lo.abs().max(hi.abs());
            let scale = if max_abs < MIN_SCALE { MIN_SCALE } else { max_abs / qmax as f32 };
            (scale, 0)
        }
        QuantMode::Asymmetric => {
            let width = hi - lo;
            let scale = if width < MIN_SCALE { MIN_SCALE } else { width / (qmax - qmin) as f32 };
            let zero_point = (qmin as f32 - lo / scale).round() as i32;
            (scale, zero_point.clamp(qmin, qmax))
        }
    }
}

/// Quantization parameters for a tensor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    /// Scale factor(s)
    pub scales: Vec<f32>,
    /// Zero point(s), one per scale
    pub zero_points: Vec<i32>,
    /// Quantization granularity
    pub granularity: QuantGranularity,
    /// Quantization mode
    pub mode: QuantMode,
    /// Bit width
    pub bits: u8,
}

impl QuantParams {
    /// Per-tensor parameters from a calibrated range.
    pub fn from_range(range: Range, mode: QuantMode, bits: u8) -> Result<Self> {
        check_bits(bits)?;
        let (scale, zero_point) = scale_zero_point(range, mode, bits);
        Ok(Self {
            scales: vec![scale],
            zero_points: vec![zero_point],
            granularity: QuantGranularity::PerTensor,
            mode,
            bits,
        })
    }

    /// Parameters fitted to weight values laid out `[channels, features]`.
    pub fn fit(
        values: &[f32],
        num_channels: usize,
        granularity: QuantGranularity,
        mode: QuantMode,
        bits: u8,
    ) -> Result<Self> {
        check_bits(bits)?;
        let per_channel =
            granularity == QuantGranularity::PerChannel && num_channels > 0 && !values.is_empty();
        let groups: Vec<&[f32]> = if per_channel {
            values.chunks(values.len().div_ceil(num_channels)).collect()
        } else {
            vec![values]
        };
        let (scales, zero_points): (Vec<f32>, Vec<i32>) = groups
            .iter()
            .map(|group| scale_zero_point(observed_range(group), mode, bits))
            .unzip();
        Ok(Self {
            scales,
            zero_points,
            granularity: if per_channel { QuantGranularity::PerChannel } else { QuantGranularity::PerTensor },
            mode,
            bits,
        })
    }

    /// Get number of scale/zero-point groups
    pub fn num_groups(&self) -> usize {
        self.scales.len()
    }

    fn group_size(&self, len: usize) -> usize {
        match self.granularity {
            QuantGranularity::PerTensor => len.max(1),
            QuantGranularity::PerChannel => len.div_ceil(self.scales.len().max(1)).max(1),
        }
    }

    fn group(&self, index: usize, len: usize) -> (f32, i32) {
        let g = index / self.group_size(len);
        (
            self.scales.get(g).copied().unwrap_or(1.0),
            self.zero_points.get(g).copied().unwrap_or(0),
        )
    }

    /// Quantize values to signed integers
    pub fn quantize(&self, values: &[f32]) -> Vec<i8> {
        let (qmin, qmax) = qrange(self.bits);
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let (scale, zp) = self.group(i, values.len());
                (v / scale + zp as f32).round().clamp(qmin as f32, qmax as f32) as i8
            })
            .collect()
    }

    /// Dequantize integers back to floats
    pub fn dequantize(&self, quantized: &[i8]) -> Vec<f32> {
        quantized
            .iter()
            .enumerate()
            .map(|(i, &q)| {
                let (scale, zp) = self.group(i, quantized.len());
                (i32::from(q) - zp) as f32 * scale
            })
            .collect()
    }

    /// Quantize then dequantize in place.
    pub fn fake_quantize(&self, values: &mut [f32]) {
        let (qmin, qmax) = qrange(self.bits);
        let len = values.len();
        for (i, v) in values.iter_mut().enumerate() {
            let (scale, zp) = self.group(i, len);
            let q = (*v / scale + zp as f32).round().clamp(qmin as f32, qmax as f32);
            *v = (q - zp as f32) * scale;
        }
    }
}

fn observed_range(values: &[f32]) -> Range {
    let (min, max) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if min > max {
        Range::new(0.0, 0.0)
    } else {
        Range::new(min, max)
    }
}

/// Quantized tensor with per-channel or per-tensor parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizedTensor {
    /// Quantized integer data
    pub data: Vec<i8>,
    /// Quantization parameters
    pub params: QuantParams,
    /// Original shape
    pub shape: Vec<usize>,
}

impl QuantizedTensor {
    /// Quantize a float tensor, treating axis 0 as the channel axis.
    pub fn from_values(
        values: &[f32],
        shape: &[usize],
        granularity: QuantGranularity,
        mode: QuantMode,
        bits: u8,
    ) -> Result<Self> {
        let channels = shape.first().copied().unwrap_or(1);
        let params = QuantParams::fit(values, channels, granularity, mode, bits)?;
        Ok(Self { data: params.quantize(values), params, shape: shape.to_vec() })
    }

    /// Dequantized float values
    pub fn dequantize(&self) -> Vec<f32> {
        self.params.dequantize(&self.data)
    }

    /// Memory usage in bytes
    pub fn memory_bytes(&self) -> usize {
        self.data.len() + self.params.scales.len() * 4 + self.params.zero_points.len() * 4
    }
}
