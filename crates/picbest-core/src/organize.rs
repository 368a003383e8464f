use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::pathlen::{create_safe_path, write_sidecar, MAX_PATH_LENGTH};
use crate::placer::{CollisionStrategy, FilenameRegistry};
use crate::quality::{find_best, MetricProvider, MetricSpec};
use crate::transfer::{transfer, TransferMode};
use crate::ThrottledProgress;

/// Options governing output-tree construction.
#[derive(Debug, Clone)]
pub struct OrganizeOptions {
    /// Group directory name template; fields: {filename} {width} {height}
    pub naming_pattern: String,
    pub transfer_mode: TransferMode,
    /// Always copy the best image regardless of the transfer mode
    pub copy_best: bool,
    /// Suffix of the candidates subdirectory
    pub suffix: String,
    pub handle_long_paths: bool,
    pub max_path_length: usize,
    pub include_singletons: bool,
    pub singletons_subdir: String,
    pub collision_strategy: CollisionStrategy,
    pub create_backlinks: bool,
    /// Compute every name and collision but touch nothing on disk
    pub dry_run: bool,
}

impl Default for OrganizeOptions {
    fn default() -> Self {
        Self {
            naming_pattern: "{filename}_{width}x{height}_candidates".to_string(),
            transfer_mode: TransferMode::Symlink,
            copy_best: false,
            suffix: "_candidates".to_string(),
            handle_long_paths: true,
            max_path_length: MAX_PATH_LENGTH,
            include_singletons: true,
            singletons_subdir: "_singletons_".to_string(),
            collision_strategy: CollisionStrategy::Hierarchical,
            create_backlinks: false,
            dry_run: false,
        }
    }
}

/// Where one multi-image group ended up.
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub best_image: PathBuf,
    pub best_dest: PathBuf,
    pub candidates_dir: PathBuf,
    pub candidates_placed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct OrganizeSummary {
    pub groups: Vec<GroupOutcome>,
    pub singletons_placed: u64,
    pub sidecars_written: u64,
    pub per_item_failures: u64,
}

fn stem_of(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("file")
}

fn basename_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

/// Run `desired` through the length guard; the sidecar is counted in
/// dry-run mode but only written to disk in a live run.
fn guard(
    desired: PathBuf,
    context: &[(&str, String)],
    opts: &OrganizeOptions,
    summary: &mut OrganizeSummary,
) -> PathBuf {
    if !opts.handle_long_paths {
        return desired;
    }
    let guarded = create_safe_path(&desired, opts.max_path_length);
    if let Some(sidecar) = guarded.sidecar {
        summary.sidecars_written += 1;
        if !opts.dry_run {
            if let Err(err) = write_sidecar(&sidecar, &desired, context) {
                warn!("failed to write sidecar {}: {err}", sidecar.display());
                summary.per_item_failures += 1;
            }
        }
    }
    guarded.path
}

/// Build the group/candidates/singleton tree for the given partition.
///
/// Every placement is length-guarded and collision-checked. Per-item
/// transfer failures are logged against their source/destination pair
/// and skipped; they never abort the group or the batch.
pub fn build_output(
    groups: &[Vec<PathBuf>],
    output_dir: &Path,
    spec: &MetricSpec,
    provider: &dyn MetricProvider,
    opts: &OrganizeOptions,
    registry: &mut FilenameRegistry,
    progress: &ThrottledProgress,
) -> anyhow::Result<OrganizeSummary> {
    let mut summary = OrganizeSummary::default();
    if !opts.dry_run {
        fs::create_dir_all(output_dir)?;
    }

    let mut singletons: Vec<&PathBuf> = Vec::new();
    let total = groups.len() as u64;

    for (idx, group) in groups.iter().enumerate() {
        progress.report("organize", idx as u64, total, "Building output structure");

        if group.len() == 1 {
            if opts.include_singletons {
                singletons.push(&group[0]);
            }
            continue;
        }

        let Some(best) = find_best(group, spec, provider) else {
            warn!("could not determine best image for group {idx}");
            continue;
        };
        let best_stem = stem_of(best);
        let (width, height) = provider.dimensions(best);

        let dir_name = opts
            .naming_pattern
            .replace("{filename}", best_stem)
            .replace("{width}", &width.to_string())
            .replace("{height}", &height.to_string());
        let group_dir = guard(
            output_dir.join(&dir_name),
            &[
                ("Original name", dir_name.clone()),
                ("Best image", best.display().to_string()),
                ("Image dimensions", format!("{width}x{height}")),
            ],
            opts,
            &mut summary,
        );
        // Two groups can share a best stem and dimensions; the group
        // directory name is collision-checked like any placement.
        let group_dir = registry.allocate(&group_dir, best, opts.collision_strategy);

        let candidates_name = format!("{best_stem}{}", opts.suffix);
        let candidates_dir = guard(
            group_dir.join(&candidates_name),
            &[
                ("Original name", candidates_name.clone()),
                ("Parent group", dir_name.clone()),
            ],
            opts,
            &mut summary,
        );

        if !opts.dry_run {
            if let Err(err) = fs::create_dir_all(&candidates_dir) {
                error!("failed to create group directories under {}: {err}", group_dir.display());
                summary.per_item_failures += 1;
                continue;
            }
        }

        // Place the best image in the group directory
        let best_desired = guard(
            group_dir.join(basename_of(best)),
            &[
                ("Original filename", basename_of(best)),
                ("Source path", best.display().to_string()),
            ],
            opts,
            &mut summary,
        );
        let best_dest = registry.allocate(&best_desired, best, opts.collision_strategy);
        let best_mode = if opts.copy_best {
            TransferMode::Copy
        } else {
            opts.transfer_mode
        };
        if !opts.dry_run {
            if let Err(err) = transfer(best, &best_dest, best_mode, opts.create_backlinks) {
                error!(
                    "failed to place best image {} -> {}: {err}",
                    best.display(),
                    best_dest.display()
                );
                summary.per_item_failures += 1;
                continue;
            }
        }

        // Every member of the group, best included, goes into the
        // candidates subdirectory.
        let mut placed = 0u64;
        for member in group {
            let desired = guard(
                candidates_dir.join(basename_of(member)),
                &[
                    ("Original filename", basename_of(member)),
                    ("Source path", member.display().to_string()),
                ],
                opts,
                &mut summary,
            );
            let dest = registry.allocate(&desired, member, opts.collision_strategy);
            if !opts.dry_run {
                if let Err(err) = transfer(member, &dest, opts.transfer_mode, opts.create_backlinks)
                {
                    error!(
                        "failed to place candidate {} -> {}: {err}",
                        member.display(),
                        dest.display()
                    );
                    summary.per_item_failures += 1;
                    continue;
                }
            }
            placed += 1;
        }

        summary.groups.push(GroupOutcome {
            best_image: best.clone(),
            best_dest,
            candidates_dir,
            candidates_placed: placed,
        });
    }

    if opts.include_singletons && !singletons.is_empty() {
        let singletons_dir = output_dir.join(&opts.singletons_subdir);
        if !opts.dry_run {
            fs::create_dir_all(&singletons_dir)?;
        }
        for singleton in singletons {
            let desired = guard(
                singletons_dir.join(basename_of(singleton)),
                &[
                    ("Original filename", basename_of(singleton)),
                    ("Source path", singleton.display().to_string()),
                ],
                opts,
                &mut summary,
            );
            let dest = registry.allocate(&desired, singleton, opts.collision_strategy);
            if !opts.dry_run {
                if let Err(err) =
                    transfer(singleton, &dest, opts.transfer_mode, opts.create_backlinks)
                {
                    error!(
                        "failed to place singleton {} -> {}: {err}",
                        singleton.display(),
                        dest.display()
                    );
                    summary.per_item_failures += 1;
                    continue;
                }
            }
            summary.singletons_placed += 1;
        }
        info!("placed {} singleton images", summary.singletons_placed);
    }

    Ok(summary)
}

fn is_collectable(path: &Path) -> bool {
    let name = basename_of(path);
    path.is_file() && !name.starts_with('.') && !name.ends_with(".txt")
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map(|rd| rd.flatten().map(|e| e.path()).collect())
        .unwrap_or_default();
    entries.sort();
    entries
}

/// Gather the best image of every group directory, plus all singletons,
/// into one flat collection directory.
///
/// The single non-hidden, non-sidecar file directly inside a group
/// directory is taken as its best image; candidate subdirectories and
/// sidecar records are left alone. Callers pass a freshly reset
/// registry; this pass never runs in dry-run mode.
pub fn collect_best(
    output_dir: &Path,
    collection_dir: &Path,
    mode: TransferMode,
    opts: &OrganizeOptions,
    registry: &mut FilenameRegistry,
) -> anyhow::Result<u64> {
    fs::create_dir_all(collection_dir)?;
    info!("collecting best images into {}", collection_dir.display());

    let mut collected = 0u64;
    let mut scratch = OrganizeSummary::default();

    for group_dir in sorted_entries(output_dir) {
        let name = basename_of(&group_dir);
        if !group_dir.is_dir()
            || name.starts_with('.')
            || name == opts.singletons_subdir
            || group_dir == collection_dir
        {
            continue;
        }

        let Some(best) = sorted_entries(&group_dir).into_iter().find(|p| is_collectable(p))
        else {
            warn!("no best image found in {}", group_dir.display());
            continue;
        };

        let desired = guard(
            collection_dir.join(basename_of(&best)),
            &[
                ("Original filename", basename_of(&best)),
                ("Source path", best.display().to_string()),
                ("Source group", name),
            ],
            opts,
            &mut scratch,
        );
        let dest = registry.allocate(&desired, &best, opts.collision_strategy);
        match transfer(&best, &dest, mode, opts.create_backlinks) {
            Ok(()) => collected += 1,
            Err(err) => error!("error collecting {}: {err}", best.display()),
        }
    }

    let singletons_dir = output_dir.join(&opts.singletons_subdir);
    if opts.include_singletons && singletons_dir.is_dir() {
        for singleton in sorted_entries(&singletons_dir) {
            if !is_collectable(&singleton) {
                continue;
            }
            let desired = guard(
                collection_dir.join(basename_of(&singleton)),
                &[
                    ("Original filename", basename_of(&singleton)),
                    ("Source path", singleton.display().to_string()),
                    ("Source", "Singleton".to_string()),
                ],
                opts,
                &mut scratch,
            );
            let dest = registry.allocate(&desired, &singleton, opts.collision_strategy);
            match transfer(&singleton, &dest, mode, opts.create_backlinks) {
                Ok(()) => collected += 1,
                Err(err) => error!("error collecting singleton {}: {err}", singleton.display()),
            }
        }
    }

    info!("collected {collected} images to {}", collection_dir.display());
    Ok(collected)
}
