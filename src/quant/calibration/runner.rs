//! Driving the estimator over all shards of a calibration dataset

use super::estimator::RangeEstimator;
use super::types::{CalibrationConfig, TensorRange};
use crate::data::{CalibrationDataset, Shard};
use crate::model::ActivationModel;
use calibrar_common::{CalibrarError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// How shards are scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardExecution {
    /// One shard at a time into a single accumulator
    #[default]
    Sequential,
    /// Shards on a dedicated thread pool, one forked accumulator each,
    /// merged afterwards. `threads = 0` uses one thread per core.
    Parallel {
        /// Worker threads
        threads: usize,
    },
}

impl FromStr for ShardExecution {
    type Err = String;

    /// Accepts `sequential`, `parallel` or `parallel:<threads>`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        match lower.split_once(':') {
            None if lower == "sequential" => Ok(Self::Sequential),
            None if lower == "parallel" => Ok(Self::Parallel { threads: 0 }),
            Some(("parallel", n)) => n
                .parse()
                .map(|threads| Self::Parallel { threads })
                .map_err(|_| format!("Invalid thread count in '{s}'")),
            _ => Err(format!(
                "Unknown execution mode: {s}. Valid modes: sequential, parallel, parallel:<threads>"
            )),
        }
    }
}

impl fmt::Display for ShardExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel { threads: 0 } => write!(f, "parallel"),
            Self::Parallel { threads } => write!(f, "parallel:{threads}"),
        }
    }
}

/// One calibration run of a model over a sharded dataset.
pub struct CalibrationRun<'m> {
    model: &'m dyn ActivationModel,
    config: CalibrationConfig,
    batch_size: usize,
    execution: ShardExecution,
    timeout: Option<Duration>,
}

impl<'m> CalibrationRun<'m> {
    /// Create a sequential run with batch size 1 and no timeout.
    pub fn new(model: &'m dyn ActivationModel, config: CalibrationConfig) -> Self {
        Self {
            model,
            config,
            batch_size: 1,
            execution: ShardExecution::default(),
            timeout: None,
        }
    }

    /// Samples per forward pass
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Shard scheduling
    pub fn with_execution(mut self, execution: ShardExecution) -> Self {
        self.execution = execution;
        self
    }

    /// Abort with a timeout error when a shard would start after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Estimate ranges for every activation of the model.
    ///
    /// The percentile policy makes two passes: a min-max pass fixes the
    /// histogram edges, then the histogram pass computes the bounds.
    pub fn estimate(&self, dataset: &CalibrationDataset) -> Result<TensorRange> {
        let started = Instant::now();
        let shards = dataset.shards();
        tracing::info!(
            method = %self.config.method(),
            samples = dataset.len(),
            shards = shards.len(),
            execution = %self.execution,
            "calibration started"
        );

        let bounds = self.accumulate(RangeEstimator::min_max(), &shards, started)?.finalize()?;
        let ranges = match &self.config {
            CalibrationConfig::MinMaxAsymmetric => bounds,
            CalibrationConfig::PercentileAsymmetric { percentile, num_bins } => {
                let estimator = RangeEstimator::percentile(*percentile, *num_bins, bounds)?;
                self.accumulate(estimator, &shards, started)?.finalize()?
            }
        };

        tracing::info!(
            tensors = ranges.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "calibration finished"
        );
        Ok(ranges)
    }

    fn accumulate(
        &self,
        mut estimator: RangeEstimator,
        shards: &[Shard<'_>],
        started: Instant,
    ) -> Result<RangeEstimator> {
        match self.execution {
            ShardExecution::Sequential => {
                for shard in shards {
                    self.check_timeout(started)?;
                    estimator.update(self.model, shard, self.batch_size)?;
                }
            }
            ShardExecution::Parallel { threads } => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| CalibrarError::config("execution", e.to_string(), "Use fewer threads"))?;
                let partials = pool.install(|| {
                    shards
                        .par_iter()
                        .map(|shard| {
                            self.check_timeout(started)?;
                            let mut partial = estimator.fork();
                            partial.update(self.model, shard, self.batch_size)?;
                            Ok(partial)
                        })
                        .collect::<Result<Vec<_>>>()
                })?;
                for partial in partials {
                    estimator.merge(partial)?;
                }
            }
        }
        Ok(estimator)
    }

    fn check_timeout(&self, started: Instant) -> Result<()> {
        match self.timeout {
            Some(limit) if started.elapsed() >= limit => Err(CalibrarError::Timeout {
                elapsed_secs: started.elapsed().as_secs_f64(),
                limit_secs: limit.as_secs(),
            }),
            _ => Ok(()),
        }
    }
}
