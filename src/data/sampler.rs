//! Seeded calibration subset selection and shard partitioning

use super::preprocess::Preprocessor;
use super::record::{RecordSet, Sample};
use calibrar_common::{CalibrarError, Result};
use rand::{prelude::SliceRandom, rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

/// How selected samples are assigned to shards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardLayout {
    /// Shard `i` holds one consecutive run of the selection
    #[default]
    Contiguous,
    /// Position `p` goes to shard `p mod K`
    Striped,
}

impl FromStr for ShardLayout {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contiguous" => Ok(Self::Contiguous),
            "striped" | "strided" => Ok(Self::Striped),
            _ => Err(format!("Unknown shard layout: {s}. Valid layouts: contiguous, striped")),
        }
    }
}

impl fmt::Display for ShardLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contiguous => write!(f, "contiguous"),
            Self::Striped => write!(f, "striped"),
        }
    }
}

/// Seeded permutation of `0..len`.
pub fn shuffled_indices(len: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(&mut rng);
    indices
}

/// Positions of contiguous shard `index` out of `count` over `total` items.
///
/// The first `total % count` shards get one extra item.
pub fn contiguous_bounds(total: usize, count: usize, index: usize) -> Range<usize> {
    let base = total / count;
    let rem = total % count;
    let start = index * base + index.min(rem);
    let len = base + usize::from(index < rem);
    start..start + len
}

/// Selects the calibration subset and partitions it into shards.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationSampler {
    num_samples: usize,
    num_shards: usize,
    seed: u64,
    layout: ShardLayout,
}

impl CalibrationSampler {
    /// Create a sampler drawing `num_samples` records into `num_shards` shards.
    pub fn new(num_samples: usize, num_shards: usize, seed: u64) -> Self {
        Self { num_samples, num_shards, seed, layout: ShardLayout::default() }
    }

    /// Set the shard layout
    pub fn with_layout(mut self, layout: ShardLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Validate counts against a dataset of `available` records.
    pub fn validate(&self, available: usize) -> Result<()> {
        if self.num_samples == 0 {
            return Err(CalibrarError::config(
                "num_calibration_samples",
                "must be at least 1, got 0",
                "Use 100 samples as a starting point",
            ));
        }
        if self.num_samples > available {
            return Err(CalibrarError::config(
                "num_calibration_samples",
                format!("requested {} samples but the dataset has {available}", self.num_samples),
                format!("Use at most {available} samples"),
            ));
        }
        if self.num_shards == 0 || self.num_shards > self.num_samples {
            return Err(CalibrarError::config(
                "num_calibration_shards",
                format!("must be between 1 and {}, got {}", self.num_samples, self.num_shards),
                "Use 1 shard unless memory is tight",
            ));
        }
        Ok(())
    }

    /// Select the calibration subset of `records`.
    ///
    /// Same seed, same dataset size and same sample count always give the
    /// same selection. Nothing is preprocessed here.
    pub fn select(
        &self,
        records: Arc<dyn RecordSet>,
        preprocessor: Arc<dyn Preprocessor>,
    ) -> Result<CalibrationDataset> {
        self.validate(records.len())?;
        let mut indices = shuffled_indices(records.len(), self.seed);
        indices.truncate(self.num_samples);

        tracing::debug!(
            samples = self.num_samples,
            shards = self.num_shards,
            layout = %self.layout,
            seed = self.seed,
            "selected calibration subset"
        );

        Ok(CalibrationDataset {
            records,
            preprocessor,
            indices,
            num_shards: self.num_shards,
            layout: self.layout,
        })
    }
}

/// Ordered seeded selection of record indices with a lazy preprocessor.
#[derive(Clone)]
pub struct CalibrationDataset {
    records: Arc<dyn RecordSet>,
    preprocessor: Arc<dyn Preprocessor>,
    indices: Vec<usize>,
    num_shards: usize,
    layout: ShardLayout,
}

impl CalibrationDataset {
    /// Number of selected samples
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether nothing was selected
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Selected record indices in selection order
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Number of shards
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Shard layout
    pub fn layout(&self) -> ShardLayout {
        self.layout
    }

    /// Preprocess the sample at selection position `position`.
    pub fn sample(&self, position: usize) -> Result<Sample> {
        let index = self.indices.get(position).ok_or_else(|| CalibrarError::DatasetFormat {
            message: format!("selection position {position} out of range (len {})", self.len()),
        })?;
        let record = self.records.get(*index)?;
        self.preprocessor.preprocess(&record)
    }

    /// Shard `index` out of [`Self::num_shards`].
    pub fn shard(&self, index: usize) -> Result<Shard<'_>> {
        if index >= self.num_shards {
            return Err(CalibrarError::config(
                "shard_index",
                format!("shard {index} does not exist ({} shards)", self.num_shards),
                format!("Use an index below {}", self.num_shards),
            ));
        }
        let positions = match self.layout {
            ShardLayout::Contiguous => contiguous_bounds(self.len(), self.num_shards, index).collect(),
            ShardLayout::Striped => (index..self.len()).step_by(self.num_shards).collect(),
        };
        Ok(Shard { dataset: self, index, positions })
    }

    /// All shards in index order.
    pub fn shards(&self) -> Vec<Shard<'_>> {
        (0..self.num_shards)
            .filter_map(|i| self.shard(i).ok())
            .collect()
    }
}

/// One partition of a [`CalibrationDataset`]. Re-iterable.
#[derive(Clone)]
pub struct Shard<'a> {
    dataset: &'a CalibrationDataset,
    index: usize,
    positions: Vec<usize>,
}

impl<'a> Shard<'a> {
    /// Shard index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Total number of shards in the partition
    pub fn shard_count(&self) -> usize {
        self.dataset.num_shards
    }

    /// Number of samples in this shard
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the shard is empty
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Underlying record indices, in shard order.
    pub fn record_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.positions.iter().map(|&p| self.dataset.indices[p])
    }

    /// Iterate preprocessed batches of at most `batch_size` samples.
    ///
    /// Samples are produced one batch at a time; calling this again restarts
    /// from the beginning of the shard.
    pub fn batches(&self, batch_size: usize) -> ShardBatches<'_> {
        ShardBatches { shard: self, batch_size: batch_size.max(1), cursor: 0 }
    }
}

/// Lazy batch iterator over a [`Shard`].
pub struct ShardBatches<'s> {
    shard: &'s Shard<'s>,
    batch_size: usize,
    cursor: usize,
}

impl Iterator for ShardBatches<'_> {
    type Item = Result<Vec<Sample>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.shard.positions.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.shard.positions.len());
        let batch = self.shard.positions[self.cursor..end]
            .iter()
            .map(|&p| self.shard.dataset.sample(p))
            .collect();
        self.cursor = end;
        Some(batch)
    }
}
