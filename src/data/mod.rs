//! Calibration data: records, loaders, preprocessing and shard sampling
//!
//! - [`DatasetLoader`]: produces train/validation [`RecordSet`]s
//! - [`Preprocessor`]: raw record to fixed-shape [`Sample`]
//! - [`CalibrationSampler`]: seeded subset split into re-iterable [`Shard`]s

mod loader;
mod preprocess;
mod record;
mod sampler;

#[cfg(test)]
mod tests;

pub use loader::{
    DatasetInfo, DatasetLoader, DatasetSplits, JsonlDatasetLoader, JsonlRecords,
    SyntheticDatasetLoader, DATASET_INFO_FILE,
};
pub use preprocess::{ImagePreprocessor, Preprocessor};
pub use record::{discover_label_column, InMemRecords, RawRecord, RecordSet, Sample};
pub use sampler::{
    contiguous_bounds, shuffled_indices, CalibrationDataset, CalibrationSampler, Shard,
    ShardBatches, ShardLayout,
};
