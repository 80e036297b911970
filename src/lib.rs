//! Post-training static quantization calibration.
//!
//! Estimates per-tensor activation ranges of a floating-point model from a
//! representative sample, quantizes the model to int8 with those ranges and
//! evaluates the quantized artifact:
//! - Seeded calibration subsets split into re-iterable shards
//! - Min-max and percentile range estimation with exact shard merging
//! - Int8 artifact with per-channel weight scales
//! - Accuracy evaluation with label mapping checks
//!
//! # Example
//!
//! ```ignore
//! use calibrar::{config::RunConfig, run};
//!
//! let config = RunConfig::from_file("calibrate.yaml")?;
//! let result = run(&config)?;
//! println!("{} tensors calibrated", result.ranges.len());
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod eval;
pub mod model;
pub mod pipeline;
pub mod quant;

pub use calibrar_common::{CalibrarError, Result};
pub use config::{ConfigValidator, RunConfig};
pub use pipeline::{Pipeline, PipelineResult, CALIBRATION_RANGES_FILE};

/// Run the calibration pipeline with the given configuration.
pub fn run(config: &RunConfig) -> Result<PipelineResult> {
    Pipeline::new(config).execute()
}
