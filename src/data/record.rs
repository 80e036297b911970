//! Raw dataset records and preprocessed samples

use calibrar_common::{CalibrarError, Result};
use serde::{Deserialize, Serialize};

/// One dataset row before preprocessing: a `[C, H, W]` pixel buffer and an
/// optional class label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Pixel values in row-major `[C, H, W]` order
    pub pixels: Vec<f32>,
    /// Image shape as `[channels, height, width]`
    pub shape: [usize; 3],
    /// Class label id as stored in the dataset
    pub label: Option<usize>,
}

impl RawRecord {
    /// Create a record, checking that the pixel buffer matches the shape.
    pub fn new(pixels: Vec<f32>, shape: [usize; 3], label: Option<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if pixels.len() != expected {
            return Err(CalibrarError::DatasetFormat {
                message: format!(
                    "pixel buffer has {} values but shape {shape:?} needs {expected}",
                    pixels.len()
                ),
            });
        }
        Ok(Self { pixels, shape, label })
    }
}

/// One preprocessed, fixed-shape float tensor. Immutable once produced.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Sample {
    /// Create a sample, checking that `data` matches `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(CalibrarError::ShapeMismatch { expected: shape, actual: vec![data.len()] });
        }
        Ok(Self { shape, data })
    }

    /// Tensor shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flattened values
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

/// An indexable collection of raw records with known length.
///
/// Implementations decode records on access; nothing here forces the whole
/// split into memory as preprocessed tensors.
pub trait RecordSet: Send + Sync {
    /// Decode the record at `index`.
    fn get(&self, index: usize) -> Result<RawRecord>;

    /// Number of records
    fn len(&self) -> usize;

    /// Whether the set has no records
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column names in declaration order
    fn column_names(&self) -> &[String];

    /// Human-readable class names, indexed by label id, when the dataset declares them
    fn label_names(&self) -> Option<&[String]>;
}

/// Pick the label column: `labels` if present, otherwise the second column.
pub fn discover_label_column(columns: &[String]) -> Option<&str> {
    if columns.iter().any(|c| c == "labels") {
        return Some("labels");
    }
    columns.get(1).map(String::as_str)
}

/// Records already decoded in memory.
#[derive(Clone, Debug)]
pub struct InMemRecords {
    records: Vec<RawRecord>,
    columns: Vec<String>,
    label_names: Option<Vec<String>>,
}

impl InMemRecords {
    /// Wrap decoded records. Columns default to `["image", "labels"]`.
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            columns: vec!["image".to_string(), "labels".to_string()],
            label_names: None,
        }
    }

    /// Declare class names
    pub fn with_label_names(mut self, names: Vec<String>) -> Self {
        self.label_names = Some(names);
        self
    }

    /// Override column names
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }
}

impl RecordSet for InMemRecords {
    fn get(&self, index: usize) -> Result<RawRecord> {
        self.records.get(index).cloned().ok_or_else(|| CalibrarError::DatasetFormat {
            message: format!("record index {index} out of range (len {})", self.records.len()),
        })
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn label_names(&self) -> Option<&[String]> {
        self.label_names.as_deref()
    }
}
