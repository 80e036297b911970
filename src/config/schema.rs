//! YAML schema of a calibration run

use crate::data::{
    CalibrationSampler, DatasetLoader, ImagePreprocessor, JsonlDatasetLoader, ShardLayout,
    SyntheticDatasetLoader,
};
use crate::quant::calibration::{DEFAULT_NUM_BINS, DEFAULT_PERCENTILE};
use crate::quant::{CalibrationConfig, CalibrationMethod, QuantizationConfig, ShardExecution};
use calibrar_common::{CalibrarError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

fn from_str_field<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr<Err = String>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn display_field<S, T>(value: &T, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Display,
{
    serializer.collect_str(value)
}

/// Complete calibration run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Model to calibrate
    pub model: ModelConfig,
    /// Dataset source
    #[serde(default)]
    pub dataset: DatasetConfig,
    /// Image preprocessing
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,
    /// Range estimation
    #[serde(default)]
    pub calibration: CalibrationSection,
    /// Backend quantization settings
    #[serde(default)]
    pub quantization: QuantizationConfig,
    /// Output location and evaluation switch
    #[serde(default)]
    pub output: OutputConfig,
    /// Seed for calibration and evaluation subsets
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl RunConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CalibrarError::io(format!("reading config file: {}", path.display()), e))?;
        Self::from_yaml(&content, path)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| CalibrarError::ConfigParsing {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| CalibrarError::serialization(e.to_string()))
    }

    /// Defaults for every section, no dataset source.
    pub fn new(model: &str) -> Self {
        Self {
            model: ModelConfig::new(model),
            dataset: DatasetConfig::default(),
            preprocessing: PreprocessingConfig::default(),
            calibration: CalibrationSection::default(),
            quantization: QuantizationConfig::default(),
            output: OutputConfig::default(),
            seed: default_seed(),
        }
    }

    /// Minimal configuration calibrating `model` on a named dataset.
    pub fn minimal(model: &str, dataset: &str, output_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(model);
        config.dataset.name = Some(dataset.to_string());
        config.output.output_dir = output_dir.into();
        config
    }

    /// Validated range estimation policy
    pub fn calibration_config(&self) -> Result<CalibrationConfig> {
        CalibrationConfig::from_method(
            self.calibration.method,
            self.calibration.calibration_histogram_percentile,
            self.calibration.num_bins,
        )
    }

    /// Preprocessor for the configured image size and statistics
    pub fn preprocessor(&self) -> ImagePreprocessor {
        ImagePreprocessor::new(self.preprocessing.image_size).with_normalization(
            self.preprocessing.image_mean.clone(),
            self.preprocessing.image_std.clone(),
        )
    }

    /// Calibration subset sampler
    pub fn sampler(&self) -> CalibrationSampler {
        CalibrationSampler::new(
            self.calibration.num_calibration_samples,
            self.calibration.num_calibration_shards,
            self.seed,
        )
        .with_layout(self.calibration.shard_layout)
    }

    /// Run-level timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.calibration.timeout_secs.map(Duration::from_secs)
    }

    /// Loader for the configured dataset source.
    ///
    /// Local directories take precedence over a dataset name.
    pub fn dataset_loader(&self) -> Result<Box<dyn DatasetLoader>> {
        match (&self.dataset.train_dir, &self.dataset.name) {
            (Some(train), _) => {
                Ok(Box::new(JsonlDatasetLoader::new(train.clone(), self.dataset.validation_dir.clone())))
            }
            (None, Some(name)) => Ok(Box::new(SyntheticDatasetLoader::by_name(name)?.with_seed(self.seed))),
            (None, None) => Err(CalibrarError::config(
                "dataset",
                "no dataset source given",
                "Set dataset.name or dataset.train_dir",
            )),
        }
    }

    /// Input shape of one model batch, `[B, C, S, S]`
    pub fn batch_input_shape(&self) -> Vec<usize> {
        let size = self.preprocessing.image_size;
        vec![self.model.batch_size, self.preprocessing.image_mean.len(), size, size]
    }

    /// Output shape of one model batch, `[B, num_labels]`
    pub fn batch_output_shape(&self) -> Vec<usize> {
        vec![self.model.batch_size, self.model.num_labels]
    }
}

/// Model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model directory or SafeTensors file
    pub model_name_or_path: String,
    /// Batch dimension of the exported model
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of output classes
    #[serde(default = "default_num_labels")]
    pub num_labels: usize,
}

impl ModelConfig {
    /// Model with default export shapes
    pub fn new(model_name_or_path: impl Into<String>) -> Self {
        Self {
            model_name_or_path: model_name_or_path.into(),
            batch_size: default_batch_size(),
            num_labels: default_num_labels(),
        }
    }
}

/// Dataset source: a built-in name or a pair of local split directories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Built-in dataset name
    #[serde(default)]
    pub name: Option<String>,
    /// Directory holding the train split
    #[serde(default)]
    pub train_dir: Option<PathBuf>,
    /// Directory holding the validation split
    #[serde(default)]
    pub validation_dir: Option<PathBuf>,
    /// Evaluate at most this many validation records
    #[serde(default)]
    pub max_eval_samples: Option<usize>,
}

/// Image preprocessing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Square output size
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    /// Per-channel mean
    #[serde(default = "default_image_stat")]
    pub image_mean: Vec<f32>,
    /// Per-channel standard deviation
    #[serde(default = "default_image_stat")]
    pub image_std: Vec<f32>,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            image_size: default_image_size(),
            image_mean: default_image_stat(),
            image_std: default_image_stat(),
        }
    }
}

/// Range estimation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSection {
    /// `minmax_asym` or `percentile_asym`
    #[serde(default, alias = "calibration_method")]
    pub method: CalibrationMethod,
    /// Samples drawn from the train split
    #[serde(default = "default_num_calibration_samples")]
    pub num_calibration_samples: usize,
    /// Shards the samples are split into
    #[serde(default = "default_num_calibration_shards")]
    pub num_calibration_shards: usize,
    /// Samples per forward pass
    #[serde(default = "default_calibration_batch_size")]
    pub calibration_batch_size: usize,
    /// Upper percentile for `percentile_asym`
    #[serde(default = "default_percentile")]
    pub calibration_histogram_percentile: f64,
    /// Histogram resolution for `percentile_asym`
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,
    /// Shard layout
    #[serde(default)]
    pub shard_layout: ShardLayout,
    /// `sequential`, `parallel` or `parallel:<threads>`
    #[serde(
        default,
        deserialize_with = "from_str_field",
        serialize_with = "display_field"
    )]
    pub execution: ShardExecution,
    /// Abort when a shard would start after this many seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for CalibrationSection {
    fn default() -> Self {
        Self {
            method: CalibrationMethod::default(),
            num_calibration_samples: default_num_calibration_samples(),
            num_calibration_shards: default_num_calibration_shards(),
            calibration_batch_size: default_calibration_batch_size(),
            calibration_histogram_percentile: default_percentile(),
            num_bins: default_num_bins(),
            shard_layout: ShardLayout::default(),
            execution: ShardExecution::default(),
            timeout_secs: None,
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving every artifact
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Allow writing into a non-empty directory
    #[serde(default)]
    pub overwrite_output_dir: bool,
    /// Evaluate the quantized model on the validation split
    #[serde(default)]
    pub do_eval: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { output_dir: default_output_dir(), overwrite_output_dir: false, do_eval: false }
    }
}

fn default_seed() -> u64 {
    42
}

fn default_batch_size() -> usize {
    1
}

fn default_num_labels() -> usize {
    3
}

fn default_image_size() -> usize {
    224
}

fn default_image_stat() -> Vec<f32> {
    vec![0.5; 3]
}

fn default_num_calibration_samples() -> usize {
    100
}

fn default_num_calibration_shards() -> usize {
    1
}

fn default_calibration_batch_size() -> usize {
    1
}

fn default_percentile() -> f64 {
    DEFAULT_PERCENTILE
}

fn default_num_bins() -> usize {
    DEFAULT_NUM_BINS
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}
