//! Calibrar CLI
//!
//! # Usage
//!
//! ```bash
//! # Calibrate from config
//! calibrar calibrate config.yaml
//!
//! # Calibrate with overrides
//! calibrar calibrate config.yaml --calibration-method percentile_asym --num-calibration-shards 4
//!
//! # Validate config
//! calibrar validate config.yaml
//!
//! # Show config info
//! calibrar info config.yaml
//! ```

use calibrar::cli::{run_command, Cli};
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
