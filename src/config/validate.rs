//! Configuration validation
//!
//! Runs before any computation so that a bad run fails with nothing written.

use super::schema::{
    CalibrationSection, DatasetConfig, ModelConfig, OutputConfig, PreprocessingConfig, RunConfig,
};
use crate::quant::calibration::validate_percentile;
use calibrar_common::{CalibrarError, Result};

/// Checks a [`RunConfig`] and reports the first problem with a suggestion.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a run configuration.
    pub fn validate(config: &RunConfig) -> Result<()> {
        Self::validate_model(&config.model)?;
        Self::validate_dataset(&config.dataset, config.output.do_eval)?;
        Self::validate_preprocessing(&config.preprocessing)?;
        Self::validate_calibration(&config.calibration)?;
        config.quantization.validate()?;
        Self::validate_output(&config.output)?;
        Ok(())
    }

    fn validate_model(config: &ModelConfig) -> Result<()> {
        if config.model_name_or_path.is_empty() {
            return Err(CalibrarError::config(
                "model.model_name_or_path",
                "Model path cannot be empty",
                "Point to a directory containing model.safetensors",
            ));
        }
        if config.batch_size == 0 {
            return Err(CalibrarError::config(
                "model.batch_size",
                "Batch size must be positive",
                "Use batch_size 1 for a static-shape export",
            ));
        }
        if config.num_labels == 0 {
            return Err(CalibrarError::config(
                "model.num_labels",
                "Number of labels must be positive",
                "Set num_labels to the number of classes the model predicts",
            ));
        }
        Ok(())
    }

    fn validate_dataset(config: &DatasetConfig, do_eval: bool) -> Result<()> {
        if config.name.is_none() && config.train_dir.is_none() {
            return Err(CalibrarError::config(
                "dataset",
                "Need either a dataset name or a train directory",
                "Set dataset.name (e.g. synthetic-blobs) or dataset.train_dir",
            ));
        }
        if config.validation_dir.is_some() && config.train_dir.is_none() {
            return Err(CalibrarError::config(
                "dataset.validation_dir",
                "A validation directory needs a train directory",
                "Set dataset.train_dir as well",
            ));
        }
        if do_eval && config.max_eval_samples == Some(0) {
            return Err(CalibrarError::config(
                "dataset.max_eval_samples",
                "Cannot evaluate on zero samples",
                "Remove max_eval_samples to evaluate the whole validation split",
            ));
        }
        Ok(())
    }

    fn validate_preprocessing(config: &PreprocessingConfig) -> Result<()> {
        if config.image_size == 0 {
            return Err(CalibrarError::config(
                "preprocessing.image_size",
                "Image size must be positive",
                "Use the input resolution the model was trained with",
            ));
        }
        if config.image_mean.is_empty() || config.image_mean.len() != config.image_std.len() {
            return Err(CalibrarError::config(
                "preprocessing.image_std",
                format!(
                    "image_mean has {} channels but image_std has {}",
                    config.image_mean.len(),
                    config.image_std.len()
                ),
                "Give one mean and one std per image channel",
            ));
        }
        if config.image_std.iter().any(|s| *s <= 0.0 || !s.is_finite()) {
            return Err(CalibrarError::config(
                "preprocessing.image_std",
                format!("Every std must be positive, got {:?}", config.image_std),
                "Use 0.5 per channel when unsure",
            ));
        }
        Ok(())
    }

    fn validate_calibration(config: &CalibrationSection) -> Result<()> {
        let samples = config.num_calibration_samples;
        if samples == 0 {
            return Err(CalibrarError::config(
                "num_calibration_samples",
                "must be at least 1, got 0",
                "Use 100 or more samples for stable ranges",
            ));
        }
        let shards = config.num_calibration_shards;
        if shards == 0 || shards > samples {
            return Err(CalibrarError::config(
                "num_calibration_shards",
                format!("must be between 1 and {samples}, got {shards}"),
                "Use 1 shard unless memory is tight",
            ));
        }
        if config.calibration_batch_size == 0 {
            return Err(CalibrarError::config(
                "calibration_batch_size",
                "must be at least 1, got 0",
                "Use 1 to match the exported batch dimension",
            ));
        }
        validate_percentile(config.calibration_histogram_percentile)?;
        if config.num_bins == 0 {
            return Err(CalibrarError::config(
                "num_bins",
                "must be at least 1, got 0",
                "Use 2048 bins",
            ));
        }
        if config.timeout_secs == Some(0) {
            return Err(CalibrarError::config(
                "timeout_secs",
                "A zero timeout would abort before the first shard",
                "Remove timeout_secs or give a positive number of seconds",
            ));
        }
        Ok(())
    }

    fn validate_output(config: &OutputConfig) -> Result<()> {
        let dir = &config.output_dir;
        if dir.as_os_str().is_empty() {
            return Err(CalibrarError::config(
                "output.output_dir",
                "Output directory cannot be empty",
                "Use a path like ./output",
            ));
        }
        if dir.is_file() {
            return Err(CalibrarError::config(
                "output.output_dir",
                format!("{} is a file", dir.display()),
                "Choose a directory path",
            ));
        }
        if dir.is_dir() && !config.overwrite_output_dir {
            let mut entries = std::fs::read_dir(dir)
                .map_err(|e| CalibrarError::io(format!("reading {}", dir.display()), e))?;
            if entries.next().is_some() {
                return Err(CalibrarError::config(
                    "output.output_dir",
                    format!("{} already exists and is not empty", dir.display()),
                    "Use --overwrite-output-dir to overcome",
                ));
            }
        }
        Ok(())
    }
}
