//! End-to-end calibration pipeline
//!
//! Validate → load dataset → export model → sample → estimate ranges →
//! quantize → evaluate. Configuration problems surface before anything is
//! written to the output directory.

use crate::config::{ConfigValidator, RunConfig};
use crate::data::{DatasetSplits, Preprocessor, RecordSet};
use crate::eval::{write_report, EvaluationOutcome, EvaluationRunner};
use crate::model::{ActivationModel, MlpModel, ModelExporter, SafetensorsExporter};
use crate::quant::{CalibrationRun, QuantizationApplier, QuantizedModel, TensorRange};
use calibrar_common::{CalibrarError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// File name of the persisted range mapping.
pub const CALIBRATION_RANGES_FILE: &str = "calibration_ranges.json";

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Staged floating-point model
    pub model_path: PathBuf,
    /// Persisted range mapping
    pub ranges_path: PathBuf,
    /// Quantized artifact
    pub artifact_path: PathBuf,
    /// Finalized ranges
    pub ranges: TensorRange,
    /// Evaluation metrics, when evaluation ran
    pub evaluation: Option<EvaluationOutcome>,
    /// Written metric report, when evaluation ran
    pub eval_results_path: Option<PathBuf>,
    /// Wall-clock duration in seconds
    pub duration_seconds: f64,
}

/// Calibration pipeline orchestrator.
pub struct Pipeline<'a> {
    config: &'a RunConfig,
    exporter: Box<dyn ModelExporter>,
    applier: QuantizationApplier,
}

impl<'a> Pipeline<'a> {
    /// Pipeline with the SafeTensors exporter and the int8 backend.
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            exporter: Box::new(SafetensorsExporter::new()),
            applier: QuantizationApplier::default(),
        }
    }

    /// Replace the model exporter
    pub fn with_exporter(mut self, exporter: impl ModelExporter + 'static) -> Self {
        self.exporter = Box::new(exporter);
        self
    }

    /// Replace the quantization applier
    pub fn with_applier(mut self, applier: QuantizationApplier) -> Self {
        self.applier = applier;
        self
    }

    /// Execute the complete pipeline.
    pub fn execute(&self) -> Result<PipelineResult> {
        let start = Instant::now();
        let config = self.config;
        let output_dir = config.output.output_dir.as_path();

        // Stage 1: everything that can be checked without writing
        ConfigValidator::validate(config)?;
        let calibration = config.calibration_config()?;
        let splits = config.dataset_loader()?.load()?;
        let sampler = config.sampler();
        sampler.validate(splits.train.len())?;
        let validation = self.validation_split(&splits)?;

        // Stage 2: stage the floating-point model
        std::fs::create_dir_all(output_dir)
            .map_err(|e| CalibrarError::io(format!("creating {}", output_dir.display()), e))?;
        let model_path = self.exporter.export(
            &config.model.model_name_or_path,
            output_dir,
            &config.batch_input_shape(),
            &config.batch_output_shape(),
        )?;
        let model = MlpModel::load(&model_path)?;

        // Stage 3: estimate ranges
        let preprocessor: Arc<dyn Preprocessor> = Arc::new(config.preprocessor());
        let dataset = sampler.select(Arc::clone(&splits.train), Arc::clone(&preprocessor))?;
        let ranges = CalibrationRun::new(&model, calibration)
            .with_batch_size(config.calibration.calibration_batch_size)
            .with_execution(config.calibration.execution)
            .with_timeout(config.timeout())
            .estimate(&dataset)?;
        let ranges_path = output_dir.join(CALIBRATION_RANGES_FILE);
        ranges.save(&ranges_path)?;

        // Stage 4: quantize. A failed apply leaves nothing of this run behind.
        let artifact_path = match self.applier.apply(
            &model_path,
            &model.activation_names(),
            &ranges,
            &config.quantization,
            output_dir,
        ) {
            Ok(path) => path,
            Err(err) => {
                discard_outputs(&[&model_path, &ranges_path]);
                return Err(err);
            }
        };

        // Stage 5: evaluate
        let (evaluation, eval_results_path) = match validation {
            Some(records) => {
                let (outcome, path) = self.evaluate(
                    &artifact_path,
                    records.as_ref(),
                    preprocessor.as_ref(),
                    output_dir,
                )?;
                (Some(outcome), Some(path))
            }
            None => (None, None),
        };

        let duration_seconds = start.elapsed().as_secs_f64();
        tracing::info!(
            output_dir = %output_dir.display(),
            tensors = ranges.len(),
            evaluated = evaluation.is_some(),
            duration_seconds,
            "pipeline finished"
        );

        Ok(PipelineResult {
            model_path,
            ranges_path,
            artifact_path,
            ranges,
            evaluation,
            eval_results_path,
            duration_seconds,
        })
    }

    fn validation_split(&self, splits: &DatasetSplits) -> Result<Option<Arc<dyn RecordSet>>> {
        if !self.config.output.do_eval {
            return Ok(None);
        }
        match &splits.validation {
            Some(records) if !records.is_empty() => Ok(Some(Arc::clone(records))),
            _ => Err(CalibrarError::config(
                "dataset.validation_dir",
                "do_eval requires a non-empty validation split",
                "Set dataset.validation_dir or disable do_eval",
            )),
        }
    }

    fn evaluate(
        &self,
        artifact_path: &Path,
        records: &dyn RecordSet,
        preprocessor: &dyn Preprocessor,
        output_dir: &Path,
    ) -> Result<(EvaluationOutcome, PathBuf)> {
        let engine = QuantizedModel::load(artifact_path)?;
        let outcome = EvaluationRunner::default()
            .with_batch_size(self.config.model.batch_size)
            .with_max_samples(self.config.dataset.max_eval_samples, self.config.seed)
            .run(&engine, records, preprocessor)?;
        let path = write_report(&outcome.metrics, output_dir)?;
        Ok((outcome, path))
    }
}

fn discard_outputs(paths: &[&Path]) {
    for path in paths.iter().filter(|p| p.exists()) {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "could not remove run output");
        }
    }
}
