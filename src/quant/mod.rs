//! Quantization: PTQ calibration and static int8 application
//!
//! Provides post-training static quantization:
//! - Activation range calibration (min-max, percentile) over sharded data
//! - Int8 weight and activation quantization from calibrated ranges

pub mod applier;
pub mod calibration;

pub use applier::{
    Int8Backend, QuantGranularity, QuantMode, QuantizationApplier, QuantizationBackend,
    QuantizationConfig, QuantizedModel, QUANTIZED_MODEL_FILE,
};
pub use calibration::{
    CalibrationConfig, CalibrationMethod, CalibrationRun, Range, RangeEstimator, ShardExecution,
    TensorRange,
};
