//! Tests for activation range calibration

use super::*;
use crate::data::{
    CalibrationDataset, CalibrationSampler, InMemRecords, Preprocessor, RawRecord, Sample,
    ShardLayout,
};
use crate::model::{ActivationModel, Activations};
use approx::assert_abs_diff_eq;
use calibrar_common::{CalibrarError, Result};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

// ========================================================================
// FIXTURES
// ========================================================================

struct Flatten;

impl Preprocessor for Flatten {
    fn preprocess(&self, record: &RawRecord) -> Result<Sample> {
        Sample::new(vec![record.pixels.len()], record.pixels.clone())
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![4]
    }
}

/// Reports the raw input and an affine transform of it.
struct Probe;

impl ActivationModel for Probe {
    fn activation_names(&self) -> Vec<String> {
        vec!["input".into(), "shifted".into()]
    }

    fn forward(&self, batch: &[Sample]) -> Result<Activations> {
        let input: Vec<f32> = batch.iter().flat_map(|s| s.data().iter().copied()).collect();
        let shifted = input.iter().map(|v| 1.0 - 2.0 * v).collect();
        Ok(Activations::from([("input".into(), input), ("shifted".into(), shifted)]))
    }
}

fn dataset(rows: &[Vec<f32>], shards: usize, layout: ShardLayout) -> CalibrationDataset {
    let records = rows
        .iter()
        .map(|r| RawRecord { pixels: r.clone(), shape: [1, 1, r.len()], label: None })
        .collect();
    CalibrationSampler::new(rows.len(), shards, 42)
        .with_layout(layout)
        .select(Arc::new(InMemRecords::new(records)), Arc::new(Flatten))
        .unwrap()
}

fn activations(values: &[f32]) -> Activations {
    Activations::from([("t".to_string(), values.to_vec())])
}

fn rows_strategy() -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(prop::collection::vec(-50.0f32..50.0, 4), 1..40)
}

// ========================================================================
// PROPERTY TESTS - Order independence and validity
// ========================================================================

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(64))]

    /// Min-max ranges match the true extrema and do not depend on shard count
    #[test]
    fn prop_min_max_independent_of_shard_count(
        rows in rows_strategy(),
        k_seed in 0usize..100,
        striped in any::<bool>(),
    ) {
        let k = k_seed % rows.len() + 1;
        let layout = if striped { ShardLayout::Striped } else { ShardLayout::Contiguous };
        let single = CalibrationRun::new(&Probe, CalibrationConfig::min_max())
            .estimate(&dataset(&rows, 1, ShardLayout::Contiguous))
            .unwrap();
        let sharded = CalibrationRun::new(&Probe, CalibrationConfig::min_max())
            .with_batch_size(3)
            .estimate(&dataset(&rows, k, layout))
            .unwrap();
        prop_assert_eq!(&single, &sharded);

        let all: Vec<f32> = rows.iter().flatten().copied().collect();
        let input = single.get("input").unwrap();
        prop_assert_eq!(input.min, all.iter().copied().fold(f32::INFINITY, f32::min));
        prop_assert_eq!(input.max, all.iter().copied().fold(f32::NEG_INFINITY, f32::max));
    }

    /// Merging partial accumulators in any order gives the same ranges
    #[test]
    fn prop_merge_order_independent(
        batches in prop::collection::vec(prop::collection::vec(-1e3f32..1e3, 1..20), 2..8),
    ) {
        let mut forward = RangeEstimator::min_max();
        for batch in &batches {
            let mut part = forward.fork();
            part.observe(&activations(batch)).unwrap();
            forward.merge(part).unwrap();
        }
        let mut backward = RangeEstimator::min_max();
        for batch in batches.iter().rev() {
            backward.observe(&activations(batch)).unwrap();
        }
        prop_assert_eq!(forward.finalize().unwrap(), backward.finalize().unwrap());
    }

    /// Percentile histograms merge to identical counts regardless of split
    #[test]
    fn prop_histogram_merge_exact(
        values in prop::collection::vec(-10.0f32..10.0, 2..200),
        split in 1usize..199,
    ) {
        let split = split.min(values.len() - 1);
        let bounds = Range::new(-10.0, 10.0);
        let mut whole = FixedHistogram::new(bounds, 64);
        whole.observe(&values);

        let mut left = FixedHistogram::new(bounds, 64);
        let mut right = FixedHistogram::new(bounds, 64);
        left.observe(&values[..split]);
        right.observe(&values[split..]);
        right.merge(&left).unwrap();

        prop_assert_eq!(whole.counts(), right.counts());
        prop_assert_eq!(whole.total(), values.len() as u64);
    }

    /// Every finalized range satisfies min <= max
    #[test]
    fn prop_ranges_valid(rows in rows_strategy(), percentile in 0.5f64..100.0) {
        let config = CalibrationConfig::percentile(percentile, 128).unwrap();
        let ranges = CalibrationRun::new(&Probe, config)
            .estimate(&dataset(&rows, 1, ShardLayout::Contiguous))
            .unwrap();
        for (_, range) in ranges.iter() {
            prop_assert!(range.is_valid(), "{range:?}");
        }
    }
}

// ========================================================================
// UNIT TESTS - Min-max policy
// ========================================================================

#[test]
fn test_min_max_observe() {
    let mut est = RangeEstimator::min_max();
    est.observe(&activations(&[0.0, 1.0, -2.0])).unwrap();
    est.observe(&activations(&[1.5, 3.0])).unwrap();
    let ranges = est.finalize().unwrap();
    assert_eq!(ranges.get("t"), Some(&Range::new(-2.0, 3.0)));
    assert_eq!(est.batches_seen(), 2);
}

#[test]
fn test_constant_tensor_has_zero_width() {
    let mut est = RangeEstimator::min_max();
    est.observe(&activations(&[5.0; 10])).unwrap();
    let range = *est.finalize().unwrap().get("t").unwrap();
    assert_eq!(range.min, range.max);
    assert_eq!(range.min, 5.0);
}

#[test]
fn test_nan_values_are_ignored() {
    let mut est = RangeEstimator::min_max();
    est.observe(&activations(&[f32::NAN, 2.0, -1.0, f32::NAN])).unwrap();
    assert_eq!(est.finalize().unwrap().get("t"), Some(&Range::new(-1.0, 2.0)));
}

#[test]
fn test_all_nan_tensor_defaults_to_zero_range() {
    let mut est = RangeEstimator::min_max();
    est.observe(&activations(&[f32::NAN])).unwrap();
    assert_eq!(est.finalize().unwrap().get("t"), Some(&Range::new(0.0, 0.0)));
}

// ========================================================================
// UNIT TESTS - State machine
// ========================================================================

#[test]
fn test_update_after_finalize_is_state_error() {
    let ds = dataset(&[vec![1.0, 2.0, 3.0, 4.0]], 1, ShardLayout::Contiguous);
    let shard = ds.shard(0).unwrap();
    let mut est = RangeEstimator::min_max();
    est.update(&Probe, &shard, 1).unwrap();
    let ranges = est.finalize().unwrap();

    let err = est.update(&Probe, &shard, 1).unwrap_err();
    assert!(matches!(err, CalibrarError::State { .. }));
    assert_eq!(est.ranges(), Some(&ranges));
}

#[test]
fn test_observe_merge_finalize_after_finalize_fail() {
    let mut est = RangeEstimator::min_max();
    est.observe(&activations(&[1.0])).unwrap();
    let fresh = est.fork();
    let ranges = est.finalize().unwrap();

    assert!(matches!(est.observe(&activations(&[9.0])), Err(CalibrarError::State { .. })));
    assert!(matches!(est.merge(fresh), Err(CalibrarError::State { .. })));
    assert!(matches!(est.finalize(), Err(CalibrarError::State { .. })));
    assert_eq!(est.ranges(), Some(&ranges));
    assert!(est.is_finalized());
}

#[test]
fn test_merge_finalized_estimator_fails() {
    let mut done = RangeEstimator::min_max();
    done.finalize().unwrap();
    let mut est = RangeEstimator::min_max();
    assert!(matches!(est.merge(done), Err(CalibrarError::State { .. })));
}

#[test]
fn test_merge_different_policies_fails() {
    let bounds: TensorRange = [("t".to_string(), Range::new(0.0, 1.0))].into_iter().collect();
    let mut est = RangeEstimator::min_max();
    let other = RangeEstimator::percentile(99.0, 16, bounds).unwrap();
    assert!(matches!(est.merge(other), Err(CalibrarError::State { .. })));
}

#[test]
fn test_ranges_none_before_finalize() {
    assert!(RangeEstimator::min_max().ranges().is_none());
}

// ========================================================================
// UNIT TESTS - Percentile policy
// ========================================================================

#[test]
fn test_percentile_uniform_stream_within_one_bin() {
    let total = 100_000usize;
    let rows: Vec<Vec<f32>> = (0..total / 100)
        .map(|r| (0..100).map(|c| (r * 100 + c) as f32 / (total - 1) as f32).collect())
        .collect();
    let config = CalibrationConfig::percentile(DEFAULT_PERCENTILE, DEFAULT_NUM_BINS).unwrap();
    let ranges = CalibrationRun::new(&Probe, config)
        .with_batch_size(50)
        .estimate(&dataset(&rows, 1, ShardLayout::Contiguous))
        .unwrap();

    let bin = 1.0 / DEFAULT_NUM_BINS as f32;
    let input = ranges.get("input").unwrap();
    assert!((input.max - 0.99999).abs() <= bin, "{input:?}");
    assert!((input.min - 0.00001).abs() <= bin, "{input:?}");
}

#[test]
fn test_percentile_clips_outliers() {
    let mut rows: Vec<Vec<f32>> = (0..250).map(|i| vec![(i % 10) as f32; 4]).collect();
    rows.push(vec![1000.0, -1000.0, 0.0, 0.0]);
    let config = CalibrationConfig::percentile(99.0, 2048).unwrap();
    let ranges = CalibrationRun::new(&Probe, config)
        .estimate(&dataset(&rows, 1, ShardLayout::Contiguous))
        .unwrap();
    let input = ranges.get("input").unwrap();
    assert!(input.max < 100.0, "{input:?}");
    assert!(input.min > -100.0, "{input:?}");
}

#[test]
fn test_percentile_100_gives_exact_extrema() {
    let rows = vec![vec![-3.0, 0.5, 1.0, 2.0], vec![7.25, 0.0, -1.0, 4.0]];
    let config = CalibrationConfig::percentile(100.0, 2048).unwrap();
    let ranges = CalibrationRun::new(&Probe, config)
        .estimate(&dataset(&rows, 2, ShardLayout::Contiguous))
        .unwrap();
    let input = ranges.get("input").unwrap();
    assert_abs_diff_eq!(input.min, -3.0, epsilon = 1e-6);
    assert_abs_diff_eq!(input.max, 7.25, epsilon = 1e-6);
}

#[test]
fn test_percentile_identical_across_sharding_and_parallelism() {
    let rows: Vec<Vec<f32>> = (0..70)
        .map(|i| (0..4).map(|c| ((i * 37 + c * 11) % 101) as f32 * 0.37 - 9.0).collect())
        .collect();
    let config = CalibrationConfig::percentile(99.9, 512).unwrap();
    let run = |k: usize, execution: ShardExecution| {
        CalibrationRun::new(&Probe, config.clone())
            .with_batch_size(4)
            .with_execution(execution)
            .estimate(&dataset(&rows, k, ShardLayout::Striped))
            .unwrap()
    };
    let baseline = run(1, ShardExecution::Sequential);
    assert_eq!(baseline, run(7, ShardExecution::Sequential));
    assert_eq!(baseline, run(7, ShardExecution::Parallel { threads: 3 }));
    assert_eq!(baseline, run(70, ShardExecution::Parallel { threads: 0 }));
}

#[test]
fn test_percentile_below_fifty_keeps_order() {
    let mut hist = FixedHistogram::new(Range::new(0.0, 10.0), 100);
    hist.observe(&(0..=100).map(|v| v as f32 / 10.0).collect::<Vec<_>>());
    let range = hist.percentile_range(10.0);
    assert!(range.min <= range.max);
    assert_abs_diff_eq!(range.min, 1.0, epsilon = 0.2);
    assert_abs_diff_eq!(range.max, 9.0, epsilon = 0.2);
}

#[test]
fn test_histogram_zero_width() {
    let mut hist = FixedHistogram::new(Range::new(2.0, 2.0), 2048);
    hist.observe(&[2.0; 5]);
    assert_eq!(hist.counts()[0], 5);
    assert_eq!(hist.percentile_range(99.999), Range::new(2.0, 2.0));
}

#[test]
fn test_histogram_out_of_bounds_lands_in_edge_bins() {
    let mut hist = FixedHistogram::new(Range::new(0.0, 1.0), 4);
    hist.observe(&[-5.0, 0.5, 9.0]);
    assert_eq!(hist.counts(), &[1, 0, 1, 1]);
}

#[test]
fn test_histogram_merge_rejects_different_edges() {
    let mut a = FixedHistogram::new(Range::new(0.0, 1.0), 4);
    let b = FixedHistogram::new(Range::new(0.0, 2.0), 4);
    assert!(matches!(a.merge(&b), Err(CalibrarError::State { .. })));
}

#[test]
fn test_percentile_without_bounds_is_configuration_error() {
    let mut est = RangeEstimator::percentile(99.0, 16, TensorRange::default()).unwrap();
    let err = est.observe(&activations(&[1.0])).unwrap_err();
    assert!(matches!(err, CalibrarError::Configuration { .. }));
}

#[test]
fn test_failed_observe_leaves_estimator_untouched() {
    let bounds: TensorRange = [("a".to_string(), Range::new(0.0, 4.0))].into_iter().collect();
    let mut est = RangeEstimator::percentile(100.0, 4, bounds).unwrap();
    let batch: Activations =
        [("a".to_string(), vec![3.5]), ("b".to_string(), vec![1.0])].into_iter().collect();
    assert!(est.observe(&batch).is_err());
    assert_eq!(est.batches_seen(), 0);

    est.observe(&[("a".to_string(), vec![0.5])].into_iter().collect()).unwrap();
    let ranges = est.finalize().unwrap();
    assert_eq!(ranges.len(), 1);
    assert!(ranges.get("a").unwrap().max <= 1.0);
}

// ========================================================================
// UNIT TESTS - Configuration and runner
// ========================================================================

#[test]
fn test_percentile_config_validation() {
    assert!(CalibrationConfig::percentile(0.0, 2048).is_err());
    assert!(CalibrationConfig::percentile(100.5, 2048).is_err());
    assert!(CalibrationConfig::percentile(f64::NAN, 2048).is_err());
    assert!(CalibrationConfig::percentile(99.0, 0).is_err());
    assert!(CalibrationConfig::percentile(100.0, 1).is_ok());
}

#[test]
fn test_config_from_method() {
    let config = CalibrationConfig::from_method(CalibrationMethod::PercentileAsym, 99.9, 256).unwrap();
    assert_eq!(config, CalibrationConfig::PercentileAsymmetric { percentile: 99.9, num_bins: 256 });
    assert_eq!(config.method(), CalibrationMethod::PercentileAsym);
    assert_eq!(
        CalibrationConfig::from_method(CalibrationMethod::MinMaxAsym, -1.0, 0).unwrap(),
        CalibrationConfig::MinMaxAsymmetric
    );
}

#[test]
fn test_calibration_method_parse_and_display() {
    assert_eq!("minmax_asym".parse::<CalibrationMethod>().unwrap(), CalibrationMethod::MinMaxAsym);
    assert_eq!("Percentile".parse::<CalibrationMethod>().unwrap(), CalibrationMethod::PercentileAsym);
    assert!("entropy".parse::<CalibrationMethod>().is_err());
    assert_eq!(CalibrationMethod::PercentileAsym.to_string(), "percentile_asym");
    assert_eq!(CalibrationMethod::default(), CalibrationMethod::MinMaxAsym);
}

#[test]
fn test_shard_execution_parse() {
    assert_eq!("sequential".parse::<ShardExecution>().unwrap(), ShardExecution::Sequential);
    assert_eq!("parallel".parse::<ShardExecution>().unwrap(), ShardExecution::Parallel { threads: 0 });
    assert_eq!("parallel:4".parse::<ShardExecution>().unwrap(), ShardExecution::Parallel { threads: 4 });
    assert!("parallel:x".parse::<ShardExecution>().is_err());
    assert!("gpu".parse::<ShardExecution>().is_err());
}

#[test]
fn test_zero_timeout_aborts_before_first_shard() {
    let ds = dataset(&[vec![0.0; 4], vec![1.0; 4]], 2, ShardLayout::Contiguous);
    let err = CalibrationRun::new(&Probe, CalibrationConfig::min_max())
        .with_timeout(Some(Duration::ZERO))
        .estimate(&ds)
        .unwrap_err();
    assert!(matches!(err, CalibrarError::Timeout { limit_secs: 0, .. }));
}

#[test]
fn test_every_activation_gets_a_range() {
    let ds = dataset(&[vec![0.0, 1.0, 2.0, 3.0]], 1, ShardLayout::Contiguous);
    let ranges = CalibrationRun::new(&Probe, CalibrationConfig::min_max()).estimate(&ds).unwrap();
    for name in Probe.activation_names() {
        assert!(ranges.contains(&name), "missing {name}");
    }
    assert_eq!(ranges.get("shifted"), Some(&Range::new(-5.0, 1.0)));
}

#[test]
fn test_tensor_range_json_sorted() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("ranges.json");
    let ranges: TensorRange = [
        ("zeta".to_string(), Range::new(0.0, 1.0)),
        ("alpha".to_string(), Range::new(-1.0, 2.0)),
    ]
    .into_iter()
    .collect();
    ranges.save(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.find("alpha").unwrap() < text.find("zeta").unwrap());
    assert_eq!(TensorRange::load(&path).unwrap(), ranges);
}
