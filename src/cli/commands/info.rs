//! Info command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{InfoArgs, OutputFormat, RunConfig};

pub fn run_info(args: InfoArgs, level: LogLevel) -> Result<(), String> {
    let config = RunConfig::from_file(&args.config).map_err(|e| format!("Config error: {e}"))?;

    match args.format {
        OutputFormat::Text => {
            log(level, LogLevel::Normal, "Configuration Info:");
            println!();
            println!("Model: {}", config.model.model_name_or_path);
            println!(
                "Calibration: {} ({} samples, {} shards)",
                config.calibration.method,
                config.calibration.num_calibration_samples,
                config.calibration.num_calibration_shards
            );
            println!("Quantization: int{}", config.quantization.bits);
            println!("Output dir: {}", config.output.output_dir.display());
            if config.output.do_eval {
                println!("Evaluation: enabled");
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&config)
                .map_err(|e| format!("JSON serialization error: {e}"))?;
            println!("{json}");
        }
        OutputFormat::Yaml => {
            let yaml = config.to_yaml().map_err(|e| format!("YAML serialization error: {e}"))?;
            println!("{yaml}");
        }
    }

    Ok(())
}
