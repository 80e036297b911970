//! CLI argument parsing
//!
//! ```bash
//! calibrar calibrate config.yaml
//! calibrar calibrate --model-name-or-path ./model --dataset-name synthetic-blobs --do-eval
//! calibrar validate config.yaml
//! calibrar info config.yaml --format json
//! ```

use super::schema::RunConfig;
use crate::data::ShardLayout;
use crate::quant::{CalibrationMethod, ShardExecution};
use calibrar_common::{CalibrarError, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Calibrar: post-training static quantization calibration
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "calibrar")]
#[command(version)]
#[command(about = "Estimate activation ranges, quantize to int8 and evaluate the result")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Calibrate, quantize and optionally evaluate a model
    Calibrate(CalibrateArgs),

    /// Validate a configuration file without running
    Validate(ValidateArgs),

    /// Display information about a configuration
    Info(InfoArgs),
}

/// Arguments for the calibrate command
#[derive(Parser, Debug, Clone, Default, PartialEq)]
pub struct CalibrateArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Model directory or SafeTensors file
    #[arg(long)]
    pub model_name_or_path: Option<String>,

    /// Built-in dataset name
    #[arg(long)]
    pub dataset_name: Option<String>,

    /// Train split directory
    #[arg(long)]
    pub train_dir: Option<PathBuf>,

    /// Validation split directory
    #[arg(long)]
    pub validation_dir: Option<PathBuf>,

    /// Override output directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Write into a non-empty output directory
    #[arg(long)]
    pub overwrite_output_dir: bool,

    /// Evaluate the quantized model
    #[arg(long)]
    pub do_eval: bool,

    /// Samples used for calibration
    #[arg(long)]
    pub num_calibration_samples: Option<usize>,

    /// Shards the calibration samples are split into
    #[arg(long)]
    pub num_calibration_shards: Option<usize>,

    /// Calibration method (minmax_asym, percentile_asym)
    #[arg(long)]
    pub calibration_method: Option<CalibrationMethod>,

    /// Upper percentile for percentile_asym
    #[arg(long)]
    pub calibration_histogram_percentile: Option<f64>,

    /// Samples per calibration forward pass
    #[arg(long)]
    pub calibration_batch_size: Option<usize>,

    /// Histogram bins for percentile_asym
    #[arg(long)]
    pub num_bins: Option<usize>,

    /// Shard layout (contiguous, striped)
    #[arg(long)]
    pub shard_layout: Option<ShardLayout>,

    /// Shard execution (sequential, parallel, parallel:<threads>)
    #[arg(long)]
    pub execution: Option<ShardExecution>,

    /// Run-level timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Evaluate at most this many validation samples
    #[arg(long)]
    pub max_eval_samples: Option<usize>,

    /// Image size after preprocessing
    #[arg(long)]
    pub image_size: Option<usize>,

    /// Number of output classes
    #[arg(long)]
    pub num_labels: Option<usize>,

    /// Random seed for reproducibility
    #[arg(long)]
    pub seed: Option<u64>,

    /// Validate and print the plan without running
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Show the resolved configuration
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for the info command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InfoArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Output format (text, json, yaml)
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for the info command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "yaml" => Ok(Self::Yaml),
            _ => Err(format!("Unknown output format: {s}. Valid formats: text, json, yaml")),
        }
    }
}

/// Parse CLI arguments from a string slice (for testing)
pub fn parse_args<I, T>(args: I) -> std::result::Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Apply command-line overrides to a run configuration
pub fn apply_overrides(config: &mut RunConfig, args: &CalibrateArgs) {
    if let Some(model) = &args.model_name_or_path {
        config.model.model_name_or_path = model.clone();
    }
    if let Some(name) = &args.dataset_name {
        config.dataset.name = Some(name.clone());
    }
    if let Some(dir) = &args.train_dir {
        config.dataset.train_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.validation_dir {
        config.dataset.validation_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.output_dir {
        config.output.output_dir = dir.clone();
    }
    config.output.overwrite_output_dir |= args.overwrite_output_dir;
    config.output.do_eval |= args.do_eval;

    let calibration = &mut config.calibration;
    if let Some(n) = args.num_calibration_samples {
        calibration.num_calibration_samples = n;
    }
    if let Some(k) = args.num_calibration_shards {
        calibration.num_calibration_shards = k;
    }
    if let Some(method) = args.calibration_method {
        calibration.method = method;
    }
    if let Some(p) = args.calibration_histogram_percentile {
        calibration.calibration_histogram_percentile = p;
    }
    if let Some(b) = args.calibration_batch_size {
        calibration.calibration_batch_size = b;
    }
    if let Some(bins) = args.num_bins {
        calibration.num_bins = bins;
    }
    if let Some(layout) = args.shard_layout {
        calibration.shard_layout = layout;
    }
    if let Some(execution) = args.execution {
        calibration.execution = execution;
    }
    if let Some(secs) = args.timeout_secs {
        calibration.timeout_secs = Some(secs);
    }

    if let Some(limit) = args.max_eval_samples {
        config.dataset.max_eval_samples = Some(limit);
    }
    if let Some(size) = args.image_size {
        config.preprocessing.image_size = size;
    }
    if let Some(labels) = args.num_labels {
        config.model.num_labels = labels;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
}

/// Build the run configuration from an optional YAML file plus flags.
///
/// Without a file, `--model-name-or-path` is required.
pub fn resolve_config(args: &CalibrateArgs) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path)?,
        None => {
            let model = args.model_name_or_path.as_deref().ok_or_else(|| {
                CalibrarError::config(
                    "model.model_name_or_path",
                    "No configuration file and no model given",
                    "Pass a CONFIG file or --model-name-or-path",
                )
            })?;
            RunConfig::new(model)
        }
    };
    apply_overrides(&mut config, args);
    Ok(config)
}
