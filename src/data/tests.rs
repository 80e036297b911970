//! Tests for calibration data loading, preprocessing and sharding

use super::*;
use approx::assert_abs_diff_eq;
use calibrar_common::CalibrarError;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn records(count: usize) -> Arc<dyn RecordSet> {
    let records = (0..count)
        .map(|i| RawRecord {
            pixels: vec![i as f32; 12],
            shape: [3, 2, 2],
            label: Some(i % 3),
        })
        .collect();
    Arc::new(InMemRecords::new(records))
}

fn identity_preprocessor() -> Arc<dyn Preprocessor> {
    Arc::new(ImagePreprocessor {
        image_size: 2,
        image_mean: vec![0.0; 3],
        image_std: vec![1.0; 3],
        rescale_factor: 1.0,
    })
}

// ========================================================================
// PROPERTY TESTS - Shard partition invariants
// ========================================================================

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(100))]

    /// Shard sizes differ by at most one and sum to N; the remainder goes first
    #[test]
    fn prop_shard_sizes_balanced(
        n in 1usize..120,
        k_seed in 0usize..1000,
        striped in any::<bool>(),
    ) {
        let k = k_seed % n + 1;
        let layout = if striped { ShardLayout::Striped } else { ShardLayout::Contiguous };
        let dataset = CalibrationSampler::new(n, k, 7)
            .with_layout(layout)
            .select(records(n + 5), identity_preprocessor())
            .unwrap();

        let sizes: Vec<usize> = dataset.shards().iter().map(Shard::len).collect();
        prop_assert_eq!(sizes.len(), k);
        prop_assert_eq!(sizes.iter().sum::<usize>(), n);
        let max = *sizes.iter().max().unwrap();
        let min = *sizes.iter().min().unwrap();
        prop_assert!(max - min <= 1);
        for (i, size) in sizes.iter().enumerate() {
            let expected = n / k + usize::from(i < n % k);
            prop_assert_eq!(*size, expected);
        }
    }

    /// Every selected record lands in exactly one shard
    #[test]
    fn prop_shards_cover_selection_once(
        n in 1usize..80,
        k_seed in 0usize..1000,
        striped in any::<bool>(),
    ) {
        let k = k_seed % n + 1;
        let layout = if striped { ShardLayout::Striped } else { ShardLayout::Contiguous };
        let dataset = CalibrationSampler::new(n, k, 3)
            .with_layout(layout)
            .select(records(100), identity_preprocessor())
            .unwrap();

        let mut seen: Vec<usize> = dataset
            .shards()
            .iter()
            .flat_map(|s| s.record_indices().collect::<Vec<_>>())
            .collect();
        let mut expected = dataset.indices().to_vec();
        seen.sort_unstable();
        expected.sort_unstable();
        prop_assert_eq!(seen, expected);
    }

    /// The seeded selection is a prefix of a permutation: no duplicates, all in range
    #[test]
    fn prop_selection_is_distinct(m in 1usize..200, seed in any::<u64>()) {
        let n = m / 2 + 1;
        let dataset = CalibrationSampler::new(n, 1, seed)
            .select(records(m), identity_preprocessor())
            .unwrap();
        let unique: HashSet<_> = dataset.indices().iter().collect();
        prop_assert_eq!(unique.len(), n);
        prop_assert!(dataset.indices().iter().all(|&i| i < m));
    }
}

// ========================================================================
// UNIT TESTS - Sampler
// ========================================================================

#[test]
fn test_selection_deterministic_for_seed() {
    let a = CalibrationSampler::new(20, 4, 42).select(records(50), identity_preprocessor()).unwrap();
    let b = CalibrationSampler::new(20, 4, 42).select(records(50), identity_preprocessor()).unwrap();
    assert_eq!(a.indices(), b.indices());

    let shards_a: Vec<Vec<usize>> = a.shards().iter().map(|s| s.record_indices().collect()).collect();
    let shards_b: Vec<Vec<usize>> = b.shards().iter().map(|s| s.record_indices().collect()).collect();
    assert_eq!(shards_a, shards_b);
}

#[test]
fn test_selection_changes_with_seed() {
    let a = CalibrationSampler::new(20, 1, 1).select(records(50), identity_preprocessor()).unwrap();
    let b = CalibrationSampler::new(20, 1, 2).select(records(50), identity_preprocessor()).unwrap();
    assert_ne!(a.indices(), b.indices());
}

#[test]
fn test_full_selection_is_permutation() {
    let dataset = CalibrationSampler::new(10, 1, 0).select(records(10), identity_preprocessor()).unwrap();
    let mut indices = dataset.indices().to_vec();
    indices.sort_unstable();
    assert_eq!(indices, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_invalid_counts_are_configuration_errors() {
    let cases = [(0, 1), (11, 1), (5, 0), (5, 6)];
    for (n, k) in cases {
        let err = CalibrationSampler::new(n, k, 0)
            .select(records(10), identity_preprocessor())
            .err()
            .unwrap_or_else(|| panic!("N={n} K={k} should fail"));
        assert!(matches!(err, CalibrarError::Configuration { .. }), "N={n} K={k}: {err}");
    }
}

#[test]
fn test_shard_count_equal_to_samples() {
    let dataset = CalibrationSampler::new(5, 5, 0).select(records(10), identity_preprocessor()).unwrap();
    assert!(dataset.shards().iter().all(|s| s.len() == 1));
}

#[test]
fn test_contiguous_bounds_remainder_first() {
    assert_eq!(contiguous_bounds(10, 3, 0), 0..4);
    assert_eq!(contiguous_bounds(10, 3, 1), 4..7);
    assert_eq!(contiguous_bounds(10, 3, 2), 7..10);
}

#[test]
fn test_striped_layout_assignment() {
    let dataset = CalibrationSampler::new(7, 3, 9)
        .with_layout(ShardLayout::Striped)
        .select(records(7), identity_preprocessor())
        .unwrap();
    let shard = dataset.shard(1).unwrap();
    let expected: Vec<usize> = [1, 4].iter().map(|&p| dataset.indices()[p]).collect();
    assert_eq!(shard.record_indices().collect::<Vec<_>>(), expected);
}

#[test]
fn test_shard_index_out_of_range() {
    let dataset = CalibrationSampler::new(4, 2, 0).select(records(4), identity_preprocessor()).unwrap();
    assert!(dataset.shard(2).is_err());
}

#[test]
fn test_shard_batches_are_restartable() {
    let dataset = CalibrationSampler::new(7, 1, 5).select(records(7), identity_preprocessor()).unwrap();
    let shard = dataset.shard(0).unwrap();

    let sizes: Vec<usize> = shard.batches(3).map(|b| b.unwrap().len()).collect();
    assert_eq!(sizes, vec![3, 3, 1]);

    let first: Vec<Sample> = shard.batches(2).flat_map(|b| b.unwrap()).collect();
    let second: Vec<Sample> = shard.batches(5).flat_map(|b| b.unwrap()).collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), 7);
}

#[test]
fn test_shard_samples_follow_record_indices() {
    let dataset = CalibrationSampler::new(6, 2, 11).select(records(20), identity_preprocessor()).unwrap();
    let shard = dataset.shard(1).unwrap();
    let samples: Vec<Sample> = shard.batches(1).flat_map(|b| b.unwrap()).collect();
    for (sample, index) in samples.iter().zip(shard.record_indices()) {
        assert_eq!(sample.data()[0], index as f32);
        assert_eq!(sample.shape(), &[3, 2, 2]);
    }
}

#[test]
fn test_shard_layout_from_str() {
    assert_eq!("contiguous".parse::<ShardLayout>().unwrap(), ShardLayout::Contiguous);
    assert_eq!("Striped".parse::<ShardLayout>().unwrap(), ShardLayout::Striped);
    assert!("diagonal".parse::<ShardLayout>().is_err());
}

// ========================================================================
// UNIT TESTS - Records and preprocessing
// ========================================================================

#[test]
fn test_raw_record_rejects_bad_length() {
    let err = RawRecord::new(vec![0.0; 5], [1, 2, 2], None).unwrap_err();
    assert!(matches!(err, CalibrarError::DatasetFormat { .. }));
}

#[test]
fn test_sample_rejects_bad_length() {
    let err = Sample::new(vec![2, 2], vec![0.0; 3]).unwrap_err();
    assert!(matches!(err, CalibrarError::ShapeMismatch { .. }));
}

#[test]
fn test_label_column_discovery() {
    let cols = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    assert_eq!(discover_label_column(&cols(&["img", "labels", "label"])), Some("labels"));
    assert_eq!(discover_label_column(&cols(&["pixel_values", "label"])), Some("label"));
    assert_eq!(discover_label_column(&cols(&["pixel_values"])), None);
}

#[test]
fn test_preprocess_rescales_and_normalizes() {
    let pre = ImagePreprocessor::new(2);
    let mut pixels = vec![0.0; 12];
    pixels[0] = 255.0;
    let record = RawRecord::new(pixels, [3, 2, 2], None).unwrap();
    let sample = pre.preprocess(&record).unwrap();

    assert_eq!(sample.shape(), &[3, 2, 2]);
    assert_abs_diff_eq!(sample.data()[0], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(sample.data()[1], -1.0, epsilon = 1e-6);
}

#[test]
fn test_preprocess_downsamples_nearest() {
    let pre = ImagePreprocessor {
        image_size: 2,
        image_mean: vec![0.0],
        image_std: vec![1.0],
        rescale_factor: 1.0,
    };
    let pixels: Vec<f32> = (0..16).map(|v| v as f32).collect();
    let record = RawRecord::new(pixels, [1, 4, 4], None).unwrap();
    let sample = pre.preprocess(&record).unwrap();
    assert_eq!(sample.data(), &[5.0, 7.0, 13.0, 15.0]);
}

#[test]
fn test_preprocess_center_crops_wide_image() {
    let pre = ImagePreprocessor {
        image_size: 2,
        image_mean: vec![0.0],
        image_std: vec![1.0],
        rescale_factor: 1.0,
    };
    let pixels: Vec<f32> = (0..8).map(|v| v as f32).collect();
    let record = RawRecord::new(pixels, [1, 2, 4], None).unwrap();
    let sample = pre.preprocess(&record).unwrap();
    assert_eq!(sample.data(), &[1.0, 2.0, 5.0, 6.0]);
}

#[test]
fn test_preprocess_rejects_short_pixel_buffer() {
    let record = RawRecord { pixels: vec![0.0; 5], shape: [3, 4, 4], label: Some(0) };
    let set = InMemRecords::new(vec![record.clone()]);
    assert_eq!(set.len(), 1);

    let err = ImagePreprocessor::new(4).preprocess(&record).unwrap_err();
    assert!(matches!(err, CalibrarError::DatasetFormat { .. }));
    assert!(err.to_string().contains("needs 48"));
}

#[test]
fn test_preprocess_channel_mismatch() {
    let pre = ImagePreprocessor::new(2);
    let record = RawRecord::new(vec![0.0; 4], [1, 2, 2], None).unwrap();
    assert!(matches!(
        pre.preprocess(&record),
        Err(CalibrarError::ShapeMismatch { .. })
    ));
}

// ========================================================================
// UNIT TESTS - Loaders
// ========================================================================

fn write_split(dir: &std::path::Path, files: &[(&str, &str)]) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join(DATASET_INFO_FILE),
        r#"{"columns": ["pixels", "label"], "image_shape": [1, 1, 2], "label_names": ["cat", "dog"]}"#,
    )
    .unwrap();
    for (name, body) in files {
        std::fs::write(dir.join(name), body).unwrap();
    }
}

#[test]
fn test_jsonl_loader_reads_files_in_name_order() {
    let tmp = tempfile::tempdir().unwrap();
    let train = tmp.path().join("train");
    write_split(
        &train,
        &[
            ("b.jsonl", "{\"pixels\": [3, 4], \"label\": 1}\n"),
            ("a.jsonl", "{\"pixels\": [1, 2], \"label\": 0}\n\n"),
            ("notes.txt", "ignored"),
        ],
    );

    let splits = JsonlDatasetLoader::new(&train, None).load().unwrap();
    assert!(splits.validation.is_none());
    assert_eq!(splits.train.len(), 2);
    assert_eq!(splits.train.get(0).unwrap().pixels, vec![1.0, 2.0]);
    assert_eq!(splits.train.get(1).unwrap().label, Some(1));
    assert_eq!(splits.train.label_names().unwrap(), &["cat".to_string(), "dog".to_string()]);
}

#[test]
fn test_jsonl_bad_record_is_dataset_error() {
    let tmp = tempfile::tempdir().unwrap();
    write_split(tmp.path(), &[("x.jsonl", "{\"pixels\": [1, \"a\"], \"label\": 0}\n")]);
    let records = JsonlRecords::from_dir(tmp.path()).unwrap();
    assert!(matches!(records.get(0), Err(CalibrarError::DatasetFormat { .. })));
}

#[test]
fn test_jsonl_missing_info_is_io_error() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(matches!(
        JsonlRecords::from_dir(tmp.path()),
        Err(CalibrarError::Io { .. })
    ));
}

#[test]
fn test_synthetic_loader_is_seeded() {
    let a = SyntheticDatasetLoader::by_name("synthetic-blobs").unwrap().with_seed(4).load().unwrap();
    let b = SyntheticDatasetLoader::by_name("synthetic-blobs").unwrap().with_seed(4).load().unwrap();
    assert_eq!(a.train.len(), 200);
    assert_eq!(a.validation.as_ref().unwrap().len(), 60);
    assert_eq!(a.train.get(17).unwrap(), b.train.get(17).unwrap());
    assert_eq!(a.train.label_names().unwrap().len(), 3);
}

#[test]
fn test_synthetic_unknown_name() {
    let err = SyntheticDatasetLoader::by_name("imagenet").unwrap_err();
    assert!(matches!(err, CalibrarError::Configuration { .. }));
}
