//! Dataset loading: JSON-lines split directories and built-in synthetic sets

use super::record::{discover_label_column, InMemRecords, RawRecord, RecordSet};
use calibrar_common::{CalibrarError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the per-split metadata file.
pub const DATASET_INFO_FILE: &str = "dataset_info.json";

/// Train and validation splits of one dataset.
#[derive(Clone)]
pub struct DatasetSplits {
    /// Split used for calibration
    pub train: Arc<dyn RecordSet>,
    /// Held-out split used for evaluation
    pub validation: Option<Arc<dyn RecordSet>>,
}

/// Source of dataset splits.
pub trait DatasetLoader {
    /// Load the splits.
    fn load(&self) -> Result<DatasetSplits>;
}

/// Per-split metadata stored next to the record files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// Column names, image column first
    pub columns: Vec<String>,
    /// Shape of every image as `[C, H, W]`
    pub image_shape: [usize; 3],
    /// Class names indexed by label id
    #[serde(default)]
    pub label_names: Option<Vec<String>>,
}

/// Records backed by JSON lines, decoded on access.
pub struct JsonlRecords {
    lines: Vec<String>,
    info: DatasetInfo,
    label_column: Option<String>,
}

impl JsonlRecords {
    /// Read every `*.jsonl` file of a split directory, in file-name order.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let info_path = dir.join(DATASET_INFO_FILE);
        let info_text = std::fs::read_to_string(&info_path)
            .map_err(|e| CalibrarError::io(format!("reading {}", info_path.display()), e))?;
        let info: DatasetInfo = serde_json::from_str(&info_text).map_err(|e| {
            CalibrarError::DatasetFormat { message: format!("{}: {e}", info_path.display()) }
        })?;
        if info.columns.is_empty() {
            return Err(CalibrarError::DatasetFormat {
                message: format!("{} declares no columns", info_path.display()),
            });
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| CalibrarError::io(format!("listing {}", dir.display()), e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        files.sort();

        let mut lines = Vec::new();
        for file in &files {
            let text = std::fs::read_to_string(file)
                .map_err(|e| CalibrarError::io(format!("reading {}", file.display()), e))?;
            lines.extend(text.lines().filter(|l| !l.trim().is_empty()).map(str::to_string));
        }

        tracing::debug!(dir = %dir.display(), files = files.len(), records = lines.len(), "loaded split");
        Ok(Self::from_lines(lines, info))
    }

    /// Build from already-read lines.
    pub fn from_lines(lines: Vec<String>, info: DatasetInfo) -> Self {
        let label_column = discover_label_column(&info.columns).map(str::to_string);
        Self { lines, info, label_column }
    }

    /// Column holding the label, if any
    pub fn label_column(&self) -> Option<&str> {
        self.label_column.as_deref()
    }
}

impl RecordSet for JsonlRecords {
    fn get(&self, index: usize) -> Result<RawRecord> {
        let line = self.lines.get(index).ok_or_else(|| CalibrarError::DatasetFormat {
            message: format!("record index {index} out of range (len {})", self.lines.len()),
        })?;
        let row: serde_json::Map<String, Value> = serde_json::from_str(line)
            .map_err(|e| CalibrarError::DatasetFormat { message: format!("line {index}: {e}") })?;

        let image_column = &self.info.columns[0];
        let pixels = row
            .get(image_column)
            .and_then(Value::as_array)
            .ok_or_else(|| CalibrarError::DatasetFormat {
                message: format!("line {index}: missing array column '{image_column}'"),
            })?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| CalibrarError::DatasetFormat {
                message: format!("line {index}: non-numeric pixel in '{image_column}'"),
            })?;

        let label = match &self.label_column {
            Some(column) => match row.get(column) {
                Some(Value::Null) | None => None,
                Some(v) => Some(v.as_u64().ok_or_else(|| CalibrarError::DatasetFormat {
                    message: format!("line {index}: label '{column}' is not a non-negative integer"),
                })? as usize),
            },
            None => None,
        };

        RawRecord::new(pixels, self.info.image_shape, label)
    }

    fn len(&self) -> usize {
        self.lines.len()
    }

    fn column_names(&self) -> &[String] {
        &self.info.columns
    }

    fn label_names(&self) -> Option<&[String]> {
        self.info.label_names.as_deref()
    }
}

/// Loads a `train_dir` / `validation_dir` pair of JSON-lines splits.
#[derive(Clone, Debug)]
pub struct JsonlDatasetLoader {
    train_dir: PathBuf,
    validation_dir: Option<PathBuf>,
}

impl JsonlDatasetLoader {
    /// Create a loader for the given split directories.
    pub fn new(train_dir: impl Into<PathBuf>, validation_dir: Option<PathBuf>) -> Self {
        Self { train_dir: train_dir.into(), validation_dir }
    }
}

impl DatasetLoader for JsonlDatasetLoader {
    fn load(&self) -> Result<DatasetSplits> {
        let train: Arc<dyn RecordSet> = Arc::new(JsonlRecords::from_dir(&self.train_dir)?);
        let validation = match &self.validation_dir {
            Some(dir) => Some(Arc::new(JsonlRecords::from_dir(dir)?) as Arc<dyn RecordSet>),
            None => None,
        };
        Ok(DatasetSplits { train, validation })
    }
}

/// Deterministic synthetic image-classification dataset.
///
/// Each class gets its own per-channel brightness pattern plus uniform
/// noise, so a small dense network can separate the classes.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticDatasetLoader {
    num_train: usize,
    num_validation: usize,
    num_classes: usize,
    image_shape: [usize; 3],
    seed: u64,
}

impl SyntheticDatasetLoader {
    /// Names accepted by [`SyntheticDatasetLoader::by_name`].
    pub const KNOWN: [&'static str; 2] = ["synthetic-blobs", "synthetic-blobs-small"];

    /// Create a synthetic dataset description.
    pub fn new(num_train: usize, num_validation: usize, num_classes: usize, image_shape: [usize; 3]) -> Self {
        Self { num_train, num_validation, num_classes, image_shape, seed: 0 }
    }

    /// Resolve a built-in dataset by name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "synthetic-blobs" => Ok(Self::new(200, 60, 3, [3, 12, 12])),
            "synthetic-blobs-small" => Ok(Self::new(100, 30, 3, [3, 8, 8])),
            other => Err(CalibrarError::config(
                "dataset.name",
                format!("unknown dataset '{other}'"),
                format!("Use one of {:?} or set dataset.train_dir", Self::KNOWN),
            )),
        }
    }

    /// Set the generator seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn generate(&self, count: usize, seed: u64) -> InMemRecords {
        let mut rng = StdRng::seed_from_u64(seed);
        let [channels, height, width] = self.image_shape;
        let records = (0..count)
            .map(|i| {
                let label = i % self.num_classes;
                let mut pixels = Vec::with_capacity(channels * height * width);
                for c in 0..channels {
                    let center = 48.0 + 80.0 * ((label + c) % self.num_classes) as f32;
                    for _ in 0..height * width {
                        let noise: f32 = rng.random_range(-40.0..40.0);
                        pixels.push((center + noise).clamp(0.0, 255.0));
                    }
                }
                RawRecord { pixels, shape: self.image_shape, label: Some(label) }
            })
            .collect();
        let names = (0..self.num_classes).map(|c| format!("class_{c}")).collect();
        InMemRecords::new(records).with_label_names(names)
    }
}

impl DatasetLoader for SyntheticDatasetLoader {
    fn load(&self) -> Result<DatasetSplits> {
        let train = self.generate(self.num_train, self.seed);
        let validation = self.generate(self.num_validation, self.seed.wrapping_add(1));
        Ok(DatasetSplits { train: Arc::new(train), validation: Some(Arc::new(validation)) })
    }
}
