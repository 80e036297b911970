//! PTQ (Post-Training Quantization) Calibration
//!
//! Range estimation for activation tensors from representative data:
//! - Min-Max: running minimum and maximum of every activation
//! - Percentile: bounds read off a fixed-edge histogram, robust to outliers
//!
//! Both policies accumulate shard by shard and merge exactly, so results do
//! not depend on shard count, order or parallelism.

mod estimator;
mod runner;
mod stats;
mod types;

#[cfg(test)]
mod tests;

pub use estimator::RangeEstimator;
pub use runner::{CalibrationRun, ShardExecution};
pub use stats::{FixedHistogram, MinMaxStats, TensorStats};
pub use types::{
    CalibrationConfig, CalibrationMethod, Range, TensorRange, DEFAULT_NUM_BINS, DEFAULT_PERCENTILE,
};

pub(crate) use types::validate_percentile;
