use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use picbest_core::{
    process, process_with_metrics, DatePreference, Embedding, EmbeddingProvider, Error, Metric,
    MetricProvider, RunOptions,
};
use tempfile::tempdir;

/// Valid 1x1 RGBA PNG.
const PNG_1X1: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Provider serving a fixed path -> vector table.
struct StaticEmbeddings(HashMap<PathBuf, Embedding>);

impl StaticEmbeddings {
    fn new(entries: &[(&Path, &[f32])]) -> Self {
        Self(
            entries
                .iter()
                .map(|(p, v)| (p.to_path_buf(), v.to_vec()))
                .collect(),
        )
    }
}

impl EmbeddingProvider for StaticEmbeddings {
    fn embeddings(&self, paths: &[PathBuf]) -> anyhow::Result<HashMap<PathBuf, Embedding>> {
        Ok(paths
            .iter()
            .filter_map(|p| self.0.get(p).map(|v| (p.clone(), v.clone())))
            .collect())
    }
}

/// Ranks every metric by actual file size and reports fixed dimensions,
/// keeping test outcomes independent of timestamps.
struct SizeMetrics;

impl MetricProvider for SizeMetrics {
    fn value(&self, id: &Path, _metric: Metric, _pref: DatePreference) -> f64 {
        fs::metadata(id).map(|m| m.len() as f64).unwrap_or(0.0)
    }

    fn dimensions(&self, _id: &Path) -> (u32, u32) {
        (800, 600)
    }
}

fn quiet() -> &'static picbest_core::ProgressCallback {
    &|_, _, _, _| {}
}

fn base_options(input: &Path, output: &Path) -> RunOptions {
    serde_json::from_value(serde_json::json!({
        "input_dirs": [input],
        "output_dir": output,
        "file_handling": "copy",
        "primary_metrics": ["filesize"],
    }))
    .unwrap()
}

/// dirA/photo.jpg and dirB/photo.jpg are near-duplicates (dirB's is
/// larger and should win); unique.jpg stands alone.
fn write_inputs(root: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let a = root.join("dirA/photo.jpg");
    let b = root.join("dirB/photo.jpg");
    let u = root.join("dirA/unique.jpg");
    for (path, contents) in [(&a, "small"), (&b, "bigger!!"), (&u, "alone")] {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
    (a, b, u)
}

fn embeddings_for(a: &Path, b: &Path, u: &Path) -> StaticEmbeddings {
    StaticEmbeddings::new(&[
        (a, &[1.0, 0.0, 0.0][..]),
        (b, &[1.0, 0.0, 0.0][..]),
        (u, &[0.0, 1.0, 0.0][..]),
    ])
}

#[test]
fn test_full_run_builds_expected_tree() {
    let dir = tempdir().unwrap();
    let input = fs::canonicalize(dir.path()).unwrap();
    let (a, b, u) = write_inputs(&input);
    let output = input.join("out");

    let mut options = base_options(&input, &output);
    options.collect_results = true;

    let summary = process_with_metrics(
        &options,
        &embeddings_for(&a, &b, &u),
        &SizeMetrics,
        quiet(),
    )
    .unwrap();

    assert_eq!(summary.total_images, 3);
    assert_eq!(summary.multi_groups, 1);
    assert_eq!(summary.singletons, 1);
    assert_eq!(summary.group_dirs_created, 1);
    assert_eq!(summary.candidates_placed, 2);
    assert_eq!(summary.singletons_placed, 1);
    assert_eq!(summary.per_item_failures, 0);

    // The bigger duplicate won and sits in the group directory.
    let group_dir = output.join("photo_800x600_candidates");
    assert_eq!(fs::read(group_dir.join("photo.jpg")).unwrap(), b"bigger!!");

    // Candidates subdir holds both members; the second needed a
    // collision suffix since they share a basename.
    let candidates = group_dir.join("photo_candidates");
    let mut names: Vec<String> = fs::read_dir(&candidates)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"photo.jpg".to_string()));
    assert!(names.iter().any(|n| n.starts_with("photo_") && n != "photo_candidates"));

    // Singleton went flat into the singletons directory.
    assert!(output.join("_singletons_/unique.jpg").is_file());

    // Collect pass gathered one best image plus one singleton.
    assert_eq!(summary.collected, 2);
    assert!(output.join("best_collection/photo.jpg").is_file());
    assert!(output.join("best_collection/unique.jpg").is_file());

    // The embedding cache was written beside the tree.
    assert!(output.join(".embedding_cache.json").is_file());
}

#[test]
fn test_dry_run_matches_live_counts_without_mutation() {
    let dir = tempdir().unwrap();
    let input = fs::canonicalize(dir.path()).unwrap();
    let (a, b, u) = write_inputs(&input);
    let embeddings = embeddings_for(&a, &b, &u);

    let dry_out = input.join("dry_out");
    let mut dry_options = base_options(&input, &dry_out);
    dry_options.dry_run = true;
    let dry = process_with_metrics(&dry_options, &embeddings, &SizeMetrics, quiet()).unwrap();

    assert!(dry.dry_run);
    assert!(!dry_out.exists());

    let live_out = input.join("live_out");
    let live_options = base_options(&input, &live_out);
    let live = process_with_metrics(&live_options, &embeddings, &SizeMetrics, quiet()).unwrap();

    assert_eq!(dry.total_images, live.total_images);
    assert_eq!(dry.multi_groups, live.multi_groups);
    assert_eq!(dry.singletons, live.singletons);
    assert_eq!(dry.group_dirs_created, live.group_dirs_created);
    assert_eq!(dry.candidates_placed, live.candidates_placed);
    assert_eq!(dry.singletons_placed, live.singletons_placed);
    assert_eq!(dry.sidecars_written, live.sidecars_written);
}

#[test]
fn test_default_metrics_with_real_images() {
    let dir = tempdir().unwrap();
    let input = fs::canonicalize(dir.path()).unwrap();
    let a = input.join("dirA/shot.png");
    let b = input.join("dirB/shot.png");
    fs::create_dir_all(a.parent().unwrap()).unwrap();
    fs::create_dir_all(b.parent().unwrap()).unwrap();
    fs::write(&a, PNG_1X1).unwrap();
    // Same pixels plus trailing padding: larger file, same dimensions.
    let mut padded = PNG_1X1.to_vec();
    padded.extend_from_slice(&[0u8; 64]);
    fs::write(&b, &padded).unwrap();

    let output = input.join("out");
    let mut options = base_options(&input, &output);
    options.primary_metrics = vec![];
    let embeddings =
        StaticEmbeddings::new(&[(a.as_path(), &[0.5, 0.5][..]), (b.as_path(), &[0.5, 0.5][..])]);

    let summary = process(&options, &embeddings, quiet()).unwrap();
    assert_eq!(summary.multi_groups, 1);

    // Dimensions and format tie; filesize decides for the padded copy,
    // and the real 1x1 header drives the directory name.
    let group_dir = output.join("shot_1x1_candidates");
    assert_eq!(fs::read(group_dir.join("shot.png")).unwrap(), padded);
}

#[test]
fn test_missing_inputs_fail_validation() {
    let dir = tempdir().unwrap();
    let options = base_options(&dir.path().join("nowhere"), &dir.path().join("out"));
    let embeddings = StaticEmbeddings::new(&[]);

    let err = process(&options, &embeddings, quiet()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::Validation(_))
    ));
}

#[test]
fn test_unknown_metric_fails_fast() {
    let dir = tempdir().unwrap();
    let input = fs::canonicalize(dir.path()).unwrap();
    write_inputs(&input);
    let mut options = base_options(&input, &input.join("out"));
    options.primary_metrics = vec!["sharpness".to_string()];

    let err = process(&options, &StaticEmbeddings::new(&[]), quiet()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::Configuration(_))
    ));
    // Fail-fast: nothing was created.
    assert!(!input.join("out").exists());
}

#[test]
fn test_no_embeddings_is_validation_error() {
    let dir = tempdir().unwrap();
    let input = fs::canonicalize(dir.path()).unwrap();
    write_inputs(&input);
    let options = base_options(&input, &input.join("out"));

    let err = process(&options, &StaticEmbeddings::new(&[]), quiet()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::Validation(_))
    ));
}
