//! Run configuration: YAML schema, validation and CLI overrides

mod cli;
mod schema;
mod validate;


pub use cli::{
    apply_overrides, parse_args, resolve_config, CalibrateArgs, Cli, Command, InfoArgs,
    OutputFormat, ValidateArgs,
};
pub use schema::{
    CalibrationSection, DatasetConfig, ModelConfig, OutputConfig, PreprocessingConfig, RunConfig,
};
pub use validate::ConfigValidator;
