//! Calibrate command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{resolve_config, CalibrateArgs, ConfigValidator, RunConfig};
use crate::pipeline::{Pipeline, PipelineResult};

/// One-line description of the calibration plan
pub fn format_plan(config: &RunConfig) -> String {
    let c = &config.calibration;
    format!(
        "{} samples in {} shard(s) ({}, {}), method {}, batch {}",
        c.num_calibration_samples,
        c.num_calibration_shards,
        c.shard_layout,
        c.execution,
        c.method,
        c.calibration_batch_size
    )
}

/// Summary lines for a finished run
pub fn format_result(result: &PipelineResult) -> Vec<String> {
    let mut lines = vec![
        format!("  Ranges: {} tensors -> {}", result.ranges.len(), result.ranges_path.display()),
        format!("  Quantized model: {}", result.artifact_path.display()),
    ];
    if let Some(outcome) = &result.evaluation {
        for (name, value) in &outcome.metrics {
            lines.push(format!("  {name}: {value:.4}"));
        }
        if outcome.warning.is_some() {
            lines.push("  Warning: label mapping could not be verified".to_string());
        }
    }
    lines.push(format!("  Duration: {:.2}s", result.duration_seconds));
    lines
}

pub fn run_calibrate(args: CalibrateArgs, level: LogLevel) -> Result<(), String> {
    let config = resolve_config(&args).map_err(|e| format!("Config error: {e}"))?;

    log(
        level,
        LogLevel::Normal,
        &format!("Calibrar: calibrating {}", config.model.model_name_or_path),
    );
    log(level, LogLevel::Verbose, &format!("  Plan: {}", format_plan(&config)));

    if args.dry_run {
        ConfigValidator::validate(&config).map_err(|e| format!("Validation failed: {e}"))?;
        log(level, LogLevel::Normal, "Dry run - config validated successfully");
        return Ok(());
    }

    let result = Pipeline::new(&config)
        .execute()
        .map_err(|e| format!("Calibration error [{}]: {e}", e.code()))?;

    log(level, LogLevel::Normal, "Calibration complete!");
    for line in format_result(&result) {
        log(level, LogLevel::Normal, &line);
    }
    Ok(())
}
