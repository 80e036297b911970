//! Validate command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{ConfigValidator, RunConfig, ValidateArgs};

/// Format model and dataset information as a string
pub fn format_source_info(config: &RunConfig) -> String {
    let mut lines = vec![format!("  Model: {}", config.model.model_name_or_path)];
    if let Some(name) = &config.dataset.name {
        lines.push(format!("  Dataset: {name}"));
    }
    if let Some(train) = &config.dataset.train_dir {
        lines.push(format!("  Train split: {}", train.display()));
    }
    if let Some(val) = &config.dataset.validation_dir {
        lines.push(format!("  Validation split: {}", val.display()));
    }
    lines.join("\n")
}

/// Format calibration configuration as a string
pub fn format_calibration_info(config: &RunConfig) -> String {
    let c = &config.calibration;
    let mut lines = vec![
        format!("  Method: {}", c.method),
        format!("  Samples: {}", c.num_calibration_samples),
        format!("  Shards: {} ({})", c.num_calibration_shards, c.shard_layout),
        format!("  Execution: {}", c.execution),
    ];
    if c.method == crate::quant::CalibrationMethod::PercentileAsym {
        lines.push(format!(
            "  Percentile: {} over {} bins",
            c.calibration_histogram_percentile, c.num_bins
        ));
    }
    if let Some(secs) = c.timeout_secs {
        lines.push(format!("  Timeout: {secs}s"));
    }
    lines.join("\n")
}

/// Format quantization configuration as a string
pub fn format_quant_info(config: &RunConfig) -> String {
    let q = &config.quantization;
    format!(
        "  Quantization:\n    Bits: {}\n    Weights: {} {:?}\n    Activations: {}",
        q.bits, q.weight_mode, q.weight_granularity, q.activation_mode
    )
}

pub fn run_validate(args: ValidateArgs, level: LogLevel) -> Result<(), String> {
    log(
        level,
        LogLevel::Normal,
        &format!("Validating config: {}", args.config.display()),
    );

    let config = RunConfig::from_file(&args.config).map_err(|e| format!("Config error: {e}"))?;
    ConfigValidator::validate(&config).map_err(|e| format!("Validation failed: {e}"))?;
    config.calibration_config().map_err(|e| format!("Validation failed: {e}"))?;

    log(level, LogLevel::Normal, "Configuration is valid");

    if args.detailed {
        println!();
        println!("Configuration Summary:");
        println!("{}", format_source_info(&config));
        println!();
        println!("{}", format_calibration_info(&config));
        println!();
        println!("{}", format_quant_info(&config));
    }

    Ok(())
}
