pub mod cache;
pub mod organize;
pub mod pathlen;
pub mod placer;
pub mod quality;
pub mod record;
pub mod scan;
pub mod similarity;
pub mod transfer;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use log::{info, warn};
use serde::{Deserialize, Serialize};

pub use organize::{GroupOutcome, OrganizeOptions, OrganizeSummary};
pub use placer::{CollisionStrategy, FilenameRegistry};
pub use quality::{DatePreference, FsMetricProvider, Metric, MetricProvider, MetricSpec};
pub use record::ImageRecord;
pub use scan::{NameFilters, PatternMode, ScanOptions, DEFAULT_EXTENSIONS};
pub use similarity::{
    cosine_similarity, preset_threshold, CosineScorer, Embedding, RegionScorer, SimilarityScorer,
};
pub use transfer::TransferMode;

/// Errors that abort a run. Per-item failures are not represented
/// here; they are logged, counted, and skipped.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid inputs; surfaced before any mutation
    #[error("validation error: {0}")]
    Validation(String),
    /// Bad metric names, weights, modes; fails fast at startup
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Source of embedding vectors. Computing them is outside this crate;
/// implementations typically wrap a model service or a precomputed
/// dump.
pub trait EmbeddingProvider {
    /// Whole-image vectors for the given paths. Paths the provider
    /// cannot embed are simply absent from the result.
    fn embeddings(&self, paths: &[PathBuf]) -> anyhow::Result<HashMap<PathBuf, Embedding>>;

    /// Region-crop vectors (center, then corners) for region-blended
    /// scoring. The default provides none, which leaves scoring on
    /// whole images only.
    fn region_embeddings(
        &self,
        _paths: &[PathBuf],
        _regions: usize,
    ) -> anyhow::Result<HashMap<PathBuf, Vec<Embedding>>> {
        Ok(HashMap::new())
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f32 {
    0.96
}

fn default_pattern_mode() -> String {
    "glob".to_string()
}

fn default_date_preference() -> String {
    "newest".to_string()
}

fn default_naming_pattern() -> String {
    "{filename}_{width}x{height}_candidates".to_string()
}

fn default_file_handling() -> String {
    "symlink".to_string()
}

fn default_suffix() -> String {
    "_candidates".to_string()
}

fn default_max_path_length() -> usize {
    pathlen::MAX_PATH_LENGTH
}

fn default_singletons_subdir() -> String {
    "_singletons_".to_string()
}

fn default_collision_strategy() -> String {
    "hierarchical".to_string()
}

fn default_collection_mode() -> String {
    "copy".to_string()
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

/// Everything a run needs. String-form fields (modes, metric names,
/// weight pairs) are validated up front by [`process`]; bad values
/// fail fast as [`Error::Configuration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    pub input_dirs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub include_dirs_pattern: Vec<String>,
    #[serde(default)]
    pub include_files_pattern: Vec<String>,
    #[serde(default)]
    pub exclude_dirs_pattern: Vec<String>,
    #[serde(default)]
    pub exclude_files_pattern: Vec<String>,
    #[serde(default = "default_pattern_mode")]
    pub pattern_mode: String,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub min_file_size_kb: u64,
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f32,
    #[serde(default)]
    pub similarity_preset: Option<String>,
    /// Number of region crops blended into the similarity score (0-5)
    #[serde(default)]
    pub check_regions: usize,
    #[serde(default)]
    pub primary_metrics: Vec<String>,
    #[serde(default)]
    pub secondary_metrics: Vec<String>,
    /// "metric:weight,metric:weight" pairs for secondary metrics
    #[serde(default)]
    pub metric_weights: Option<String>,
    #[serde(default = "default_date_preference")]
    pub date_preference: String,
    /// "metric:preference" overrides of the global date preference
    #[serde(default)]
    pub date_metric_overrides: Option<String>,
    #[serde(default = "default_naming_pattern")]
    pub naming_pattern: String,
    #[serde(default = "default_file_handling")]
    pub file_handling: String,
    #[serde(default)]
    pub copy_best: bool,
    #[serde(default = "default_suffix")]
    pub suffix: String,
    #[serde(default = "default_true")]
    pub handle_long_paths: bool,
    #[serde(default = "default_max_path_length")]
    pub max_path_length: usize,
    #[serde(default = "default_true")]
    pub include_singletons: bool,
    #[serde(default = "default_singletons_subdir")]
    pub singletons_subdir: String,
    #[serde(default = "default_collision_strategy")]
    pub collision_strategy: String,
    #[serde(default)]
    pub create_backlinks: bool,
    #[serde(default)]
    pub collect_results: bool,
    #[serde(default)]
    pub collection_dir: Option<PathBuf>,
    #[serde(default = "default_collection_mode")]
    pub collection_mode: String,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub dry_run: bool,
    /// Proceed even when the output directory already exists
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_images: u64,
    pub groups_total: u64,
    pub multi_groups: u64,
    pub singletons: u64,
    pub group_dirs_created: u64,
    pub candidates_placed: u64,
    pub singletons_placed: u64,
    pub sidecars_written: u64,
    pub per_item_failures: u64,
    pub collected: u64,
    pub dry_run: bool,
    pub elapsed_secs: f64,
}

/// Type alias for progress callback
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Throttled progress reporter - emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: std::sync::Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        Self {
            inner,
            last_emit: std::sync::Mutex::new(Instant::now() - std::time::Duration::from_secs(1)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap();
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Validated, parsed form of the string-typed options.
struct ParsedConfig {
    spec: MetricSpec,
    filters: NameFilters,
    threshold: f32,
    transfer_mode: TransferMode,
    collision_strategy: CollisionStrategy,
    collection_mode: TransferMode,
}

fn parse_config(options: &RunOptions) -> Result<ParsedConfig, Error> {
    let spec = MetricSpec::from_strings(
        &options.primary_metrics,
        &options.secondary_metrics,
        options.metric_weights.as_deref(),
        &options.date_preference,
        options.date_metric_overrides.as_deref(),
    )?;
    let pattern_mode: PatternMode = options.pattern_mode.parse()?;
    let filters = NameFilters::compile(
        &options.include_dirs_pattern,
        &options.include_files_pattern,
        &options.exclude_dirs_pattern,
        &options.exclude_files_pattern,
        pattern_mode,
    )?;
    if options.check_regions > 5 {
        return Err(Error::Configuration(format!(
            "check_regions must be 0-5, got {}",
            options.check_regions
        )));
    }
    let threshold = match &options.similarity_preset {
        Some(preset) => preset_threshold(preset)
            .ok_or_else(|| Error::Configuration(format!("unknown similarity preset: {preset}")))?,
        None => options.similarity_threshold,
    };
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::Configuration(format!(
            "similarity threshold must be in [0,1], got {threshold}"
        )));
    }
    Ok(ParsedConfig {
        spec,
        filters,
        threshold,
        transfer_mode: options.file_handling.parse()?,
        collision_strategy: options.collision_strategy.parse()?,
        collection_mode: options.collection_mode.parse()?,
    })
}

/// Run the full pipeline with filesystem-backed quality metrics.
pub fn process(
    options: &RunOptions,
    embeddings: &dyn EmbeddingProvider,
    progress: &ProgressCallback,
) -> anyhow::Result<RunSummary> {
    let metrics = FsMetricProvider::new();
    process_with_metrics(options, embeddings, &metrics, progress)
}

/// Run the full pipeline: validate, scan, embed (through the cache),
/// group, organize, and optionally collect.
pub fn process_with_metrics(
    options: &RunOptions,
    embeddings: &dyn EmbeddingProvider,
    metrics: &dyn MetricProvider,
    progress: &ProgressCallback,
) -> anyhow::Result<RunSummary> {
    let t_total = Instant::now();
    let tp = ThrottledProgress::new(progress);

    // Fail fast on configuration before touching the filesystem.
    let config = parse_config(options)?;

    // Stage 1: Validate inputs
    let mut input_dirs: Vec<PathBuf> = Vec::new();
    for dir in &options.input_dirs {
        match fs::canonicalize(dir) {
            Ok(abs) if abs.is_dir() => input_dirs.push(abs),
            _ => warn!("input directory does not exist: {}", dir.display()),
        }
    }
    if input_dirs.is_empty() {
        return Err(Error::Validation("no valid input directories".to_string()).into());
    }
    if options.output_dir.exists() && !options.force && !options.dry_run {
        return Err(Error::Validation(format!(
            "output directory {} already exists (pass force to proceed)",
            options.output_dir.display()
        ))
        .into());
    }

    // Stage 2: Scan for images
    let scan_options = ScanOptions {
        extensions: options.extensions.iter().map(|e| e.to_lowercase()).collect(),
        exclude_dirs: options.exclude_dirs.clone(),
        recursive: options.recursive,
        follow_symlinks: options.follow_symlinks,
        min_file_size_kb: options.min_file_size_kb,
    };
    let records = scan::find_images(&input_dirs, &scan_options, &config.filters, &tp);
    if records.is_empty() {
        return Err(Error::Validation("no valid images found".to_string()).into());
    }
    let ids: Vec<PathBuf> = records.iter().map(|r| r.path.clone()).collect();

    // Stage 3: Embeddings, going through the append-only cache
    let cache_path = options.output_dir.join(cache::CACHE_FILENAME);
    let mut cached = if options.use_cache {
        cache::load_cache(&cache_path)
    } else {
        HashMap::new()
    };
    let missing: Vec<PathBuf> = ids
        .iter()
        .filter(|id| !cached.contains_key(*id))
        .cloned()
        .collect();
    tp.report("embed", 0, missing.len() as u64, "Fetching embeddings");
    let mut fresh = if missing.is_empty() {
        info!("no new images to embed, using cached embeddings");
        HashMap::new()
    } else {
        embeddings.embeddings(&missing)?
    };
    if options.use_cache && !options.dry_run && !fresh.is_empty() {
        if let Err(err) = cache::save_cache(&cache_path, &fresh) {
            warn!("failed to save embedding cache: {err}");
        }
    }

    let mut vectors: HashMap<PathBuf, Embedding> = HashMap::with_capacity(ids.len());
    for id in &ids {
        if let Some(v) = cached.remove(id).or_else(|| fresh.remove(id)) {
            vectors.insert(id.clone(), v);
        }
    }
    if vectors.is_empty() {
        return Err(Error::Validation("no embeddings available".to_string()).into());
    }

    // Stage 4: Group similar images
    info!(
        "grouping {} images with similarity >= {:.4}",
        ids.len(),
        config.threshold
    );
    let groups = if options.check_regions > 0 {
        let regions = embeddings.region_embeddings(&ids, options.check_regions)?;
        let scorer = RegionScorer::new(&vectors, &regions, options.check_regions);
        similarity::group_similar(&ids, &scorer, config.threshold, &tp)
    } else {
        let scorer = CosineScorer::new(&vectors);
        similarity::group_similar(&ids, &scorer, config.threshold, &tp)
    };
    let multi_groups = groups.iter().filter(|g| g.len() > 1).count() as u64;
    let singleton_groups = groups.len() as u64 - multi_groups;
    info!(
        "found {} total groups ({multi_groups} with multiple images)",
        groups.len()
    );

    // Stage 5: Build the output structure
    let organize_options = OrganizeOptions {
        naming_pattern: options.naming_pattern.clone(),
        transfer_mode: config.transfer_mode,
        copy_best: options.copy_best,
        suffix: options.suffix.clone(),
        handle_long_paths: options.handle_long_paths,
        max_path_length: options.max_path_length,
        include_singletons: options.include_singletons,
        singletons_subdir: options.singletons_subdir.clone(),
        collision_strategy: config.collision_strategy,
        create_backlinks: options.create_backlinks,
        dry_run: options.dry_run,
    };
    let mut registry = FilenameRegistry::new();
    let summary = organize::build_output(
        &groups,
        &options.output_dir,
        &config.spec,
        metrics,
        &organize_options,
        &mut registry,
        &tp,
    )?;

    // Stage 6: Optional collection pass over the freshly built tree
    let collected = if options.collect_results && !options.dry_run {
        registry.reset();
        let collection_dir = options
            .collection_dir
            .clone()
            .unwrap_or_else(|| options.output_dir.join("best_collection"));
        organize::collect_best(
            &options.output_dir,
            &collection_dir,
            config.collection_mode,
            &organize_options,
            &mut registry,
        )?
    } else {
        0
    };

    if options.dry_run {
        info!("dry run: no files were created or modified");
    }

    Ok(RunSummary {
        total_images: records.len() as u64,
        groups_total: groups.len() as u64,
        multi_groups,
        singletons: singleton_groups,
        group_dirs_created: summary.groups.len() as u64,
        candidates_placed: summary.groups.iter().map(|g| g.candidates_placed).sum(),
        singletons_placed: summary.singletons_placed,
        sidecars_written: summary.sidecars_written,
        per_item_failures: summary.per_item_failures,
        collected,
        dry_run: options.dry_run,
        elapsed_secs: t_total.elapsed().as_secs_f64(),
    })
}
