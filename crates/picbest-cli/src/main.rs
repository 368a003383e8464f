use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use picbest_core::{Embedding, EmbeddingProvider, RunOptions};

#[derive(Parser)]
#[command(
    name = "picbest",
    version,
    about = "Find the highest quality version of similar images across directories"
)]
struct Cli {
    /// Input directories to search for images
    #[arg(short, long = "input-dirs", required = true, num_args = 1..)]
    input_dirs: Vec<PathBuf>,

    /// Output directory for organized images
    #[arg(short, long)]
    output_dir: PathBuf,

    /// JSON file mapping image paths to embedding vectors
    #[arg(long)]
    embeddings: PathBuf,

    /// JSON file mapping image paths to lists of region embedding vectors
    #[arg(long)]
    region_embeddings: Option<PathBuf>,

    /// Image extensions to include (default: common image formats)
    #[arg(short, long, num_args = 1..)]
    extensions: Vec<String>,

    /// Directories to exclude from search
    #[arg(long, num_args = 1..)]
    exclude_dirs: Vec<PathBuf>,

    /// Directory name patterns to include
    #[arg(long, num_args = 1..)]
    include_dirs_pattern: Vec<String>,

    /// File name patterns to include
    #[arg(long, num_args = 1..)]
    include_files_pattern: Vec<String>,

    /// Directory name patterns to exclude
    #[arg(long, num_args = 1..)]
    exclude_dirs_pattern: Vec<String>,

    /// File name patterns to exclude
    #[arg(long, num_args = 1..)]
    exclude_files_pattern: Vec<String>,

    /// Pattern matching mode: glob or regex
    #[arg(long, default_value = "glob")]
    pattern_mode: String,

    /// Don't search directories recursively
    #[arg(long)]
    no_recursive: bool,

    /// Follow symbolic links during traversal
    #[arg(long)]
    follow_symlinks: bool,

    /// Minimum file size to consider, in KB
    #[arg(long, default_value_t = 0)]
    min_file_size: u64,

    /// Minimum similarity score to consider images duplicates
    #[arg(long, default_value_t = 0.96)]
    similarity_threshold: f32,

    /// Named preset for the similarity threshold (overrides the value)
    #[arg(long)]
    similarity_preset: Option<String>,

    /// Number of image regions to blend into similarity checks (0-5)
    #[arg(long, default_value_t = 0)]
    check_regions: usize,

    /// Primary quality metrics, in strict order
    #[arg(long, num_args = 1..)]
    primary_metrics: Vec<String>,

    /// Secondary quality metrics for weighted tie-breaking
    #[arg(long, num_args = 1..)]
    secondary_metrics: Vec<String>,

    /// Weights as name:weight pairs (e.g. dimensions:1.0,filesize:0.8)
    #[arg(long)]
    metric_weights: Option<String>,

    /// Preference for date-based metrics: newest or oldest
    #[arg(long, default_value = "newest")]
    date_preference: String,

    /// Per-metric date overrides (e.g. modified_date:oldest)
    #[arg(long)]
    date_metric_override: Option<String>,

    /// Pattern for output directory names
    #[arg(long, default_value = "{filename}_{width}x{height}_candidates")]
    naming_pattern: String,

    /// How to place files: symlink, copy or move
    #[arg(long, default_value = "symlink")]
    file_handling: String,

    /// Always copy the best image regardless of --file-handling
    #[arg(long)]
    copy_best: bool,

    /// Suffix for candidate directories
    #[arg(long, default_value = "_candidates")]
    suffix: String,

    /// Don't shorten overlong destination paths
    #[arg(long)]
    no_handle_long_paths: bool,

    /// Maximum path length to allow
    #[arg(long, default_value_t = 250)]
    max_path_length: usize,

    /// Don't place singleton images
    #[arg(long)]
    no_include_singletons: bool,

    /// Subdirectory name for singleton images
    #[arg(long, default_value = "_singletons_")]
    singletons_subdir: String,

    /// Collision strategy: hierarchical, hash, numeric or parent_only
    #[arg(long, default_value = "hierarchical")]
    collision_strategy: String,

    /// Create links back to new locations when moving files
    #[arg(long)]
    create_backlinks: bool,

    /// Collect best images into a separate directory afterwards
    #[arg(long)]
    collect_results: bool,

    /// Directory for collected best images
    #[arg(long)]
    collection_dir: Option<PathBuf>,

    /// How to handle collected files: symlink, copy or move
    #[arg(long, default_value = "copy")]
    collection_mode: String,

    /// Don't cache embeddings
    #[arg(long)]
    no_cache: bool,

    /// Show what would be done without making changes
    #[arg(long)]
    dry_run: bool,

    /// Proceed even when the output directory already exists
    #[arg(long)]
    force: bool,

    /// Increase output verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Embeddings precomputed by an external model service and dumped to
/// JSON, keyed by absolute image path.
struct JsonEmbeddings {
    whole: HashMap<PathBuf, Embedding>,
    regions: HashMap<PathBuf, Vec<Embedding>>,
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let file =
        File::open(path).with_context(|| format!("cannot open embedding file {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("cannot parse embedding file {}", path.display()))
}

impl EmbeddingProvider for JsonEmbeddings {
    fn embeddings(&self, paths: &[PathBuf]) -> anyhow::Result<HashMap<PathBuf, Embedding>> {
        Ok(paths
            .iter()
            .filter_map(|p| self.whole.get(p).map(|v| (p.clone(), v.clone())))
            .collect())
    }

    fn region_embeddings(
        &self,
        paths: &[PathBuf],
        _regions: usize,
    ) -> anyhow::Result<HashMap<PathBuf, Vec<Embedding>>> {
        Ok(paths
            .iter()
            .filter_map(|p| self.regions.get(p).map(|v| (p.clone(), v.clone())))
            .collect())
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let provider = JsonEmbeddings {
        whole: load_json(&cli.embeddings)?,
        regions: match &cli.region_embeddings {
            Some(path) => load_json(path)?,
            None => HashMap::new(),
        },
    };

    // Normalize extensions: accept both "jpg" and ".jpg"
    let extensions: Vec<String> = if cli.extensions.is_empty() {
        picbest_core::DEFAULT_EXTENSIONS
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        cli.extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect()
    };

    let options = RunOptions {
        input_dirs: cli.input_dirs,
        output_dir: cli.output_dir,
        extensions,
        exclude_dirs: cli.exclude_dirs,
        include_dirs_pattern: cli.include_dirs_pattern,
        include_files_pattern: cli.include_files_pattern,
        exclude_dirs_pattern: cli.exclude_dirs_pattern,
        exclude_files_pattern: cli.exclude_files_pattern,
        pattern_mode: cli.pattern_mode,
        recursive: !cli.no_recursive,
        follow_symlinks: cli.follow_symlinks,
        min_file_size_kb: cli.min_file_size,
        similarity_threshold: cli.similarity_threshold,
        similarity_preset: cli.similarity_preset,
        check_regions: cli.check_regions,
        primary_metrics: cli.primary_metrics,
        secondary_metrics: cli.secondary_metrics,
        metric_weights: cli.metric_weights,
        date_preference: cli.date_preference,
        date_metric_overrides: cli.date_metric_override,
        naming_pattern: cli.naming_pattern,
        file_handling: cli.file_handling,
        copy_best: cli.copy_best,
        suffix: cli.suffix,
        handle_long_paths: !cli.no_handle_long_paths,
        max_path_length: cli.max_path_length,
        include_singletons: !cli.no_include_singletons,
        singletons_subdir: cli.singletons_subdir,
        collision_strategy: cli.collision_strategy,
        create_backlinks: cli.create_backlinks,
        collect_results: cli.collect_results,
        collection_dir: cli.collection_dir,
        collection_mode: cli.collection_mode,
        use_cache: !cli.no_cache,
        dry_run: cli.dry_run,
        force: cli.force,
    };

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} {msg}")
            .unwrap(),
    );
    let progress = {
        let pb = pb.clone();
        move |stage: &str, current: u64, total: u64, message: &str| {
            if pb.length() != Some(total) {
                pb.set_length(total);
            }
            pb.set_position((current + 1).min(total));
            pb.set_message(format!("[{stage}] {message}"));
        }
    };

    let result = picbest_core::process(&options, &provider, &progress)?;
    pb.finish_and_clear();

    eprintln!(
        "Done! {} images, {} groups with multiple images, {} singletons ({:.2}s)",
        result.total_images, result.multi_groups, result.singletons, result.elapsed_secs
    );
    eprintln!(
        "  {} group directories, {} candidates placed, {} singletons placed, {} sidecars, {} failures",
        result.group_dirs_created,
        result.candidates_placed,
        result.singletons_placed,
        result.sidecars_written,
        result.per_item_failures
    );
    if result.collected > 0 {
        eprintln!("  {} best images collected", result.collected);
    }
    if result.dry_run {
        eprintln!("This was a dry run. No files were created or modified.");
    }

    Ok(())
}
