use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;

use crate::pathlen::short_hash;
use crate::Error;

/// Naming policy used when a destination filename is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionStrategy {
    /// Parent-directory suffix, then source-path hash, then numeric
    #[default]
    Hierarchical,
    /// Parent-directory suffix, then numeric
    ParentOnly,
    /// Source-path hash, then numeric
    Hash,
    /// Numeric suffixes only
    Numeric,
}

impl FromStr for CollisionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "hierarchical" => Ok(CollisionStrategy::Hierarchical),
            "parent_only" => Ok(CollisionStrategy::ParentOnly),
            "hash" => Ok(CollisionStrategy::Hash),
            "numeric" => Ok(CollisionStrategy::Numeric),
            _ => Err(Error::Configuration(format!(
                "unknown collision strategy: {s}"
            ))),
        }
    }
}

/// Run-scoped map of destination directory to the filenames already
/// claimed there. Seeded lazily from on-disk contents the first time a
/// directory is touched; reset explicitly between independent output
/// passes; never persisted. Not thread-safe; callers serialize
/// access.
#[derive(Debug, Default)]
pub struct FilenameRegistry {
    claimed: HashMap<PathBuf, HashSet<String>>,
}

fn existing_filenames(dir: &Path) -> HashSet<String> {
    let mut names = HashSet::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return names;
    };
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names
}

fn join_name(stem: &str, suffix: &str, ext: &str) -> String {
    if ext.is_empty() {
        format!("{stem}{suffix}")
    } else {
        format!("{stem}{suffix}.{ext}")
    }
}

impl FilenameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every claim. Call between independent output passes.
    pub fn reset(&mut self) {
        self.claimed.clear();
    }

    /// Allocate a destination path in the directory of `desired` that
    /// is guaranteed unique within this run. The original basename is
    /// kept when free; otherwise the strategy decides the suffix chain.
    pub fn allocate(
        &mut self,
        desired: &Path,
        source: &Path,
        strategy: CollisionStrategy,
    ) -> PathBuf {
        let dir = desired.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        let filename = desired
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let names = self
            .claimed
            .entry(dir.clone())
            .or_insert_with(|| existing_filenames(&dir));

        if !names.contains(&filename) && !desired.exists() {
            names.insert(filename);
            return desired.to_path_buf();
        }

        let stem = desired
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("file")
            .to_string();
        let ext = desired
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_string();

        // First try: parent-directory name of the source for context
        if matches!(
            strategy,
            CollisionStrategy::Hierarchical | CollisionStrategy::ParentOnly
        ) {
            if let Some(parent) = source
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
            {
                let candidate = join_name(&stem, &format!("_{parent}"), &ext);
                if !names.contains(&candidate) && !dir.join(&candidate).exists() {
                    debug!("filename collision: {filename} -> {candidate}");
                    names.insert(candidate.clone());
                    return dir.join(candidate);
                }
            }
        }

        // Second try: hash of the full source path
        if matches!(
            strategy,
            CollisionStrategy::Hierarchical | CollisionStrategy::Hash
        ) {
            let hash = short_hash(&source.to_string_lossy());
            let candidate = join_name(&stem, &format!("_{hash}"), &ext);
            if !names.contains(&candidate) && !dir.join(&candidate).exists() {
                debug!("filename collision: {filename} -> {candidate}");
                names.insert(candidate.clone());
                return dir.join(candidate);
            }
        }

        // Final fallback: incrementing numeric suffix
        let mut counter = 1u32;
        loop {
            let candidate = join_name(&stem, &format!("_col_{counter}"), &ext);
            if !names.contains(&candidate) && !dir.join(&candidate).exists() {
                debug!("filename collision: {filename} -> {candidate}");
                names.insert(candidate.clone());
                return dir.join(candidate);
            }
            counter += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_first_claim_keeps_name() {
        let dir = tempdir().unwrap();
        let mut registry = FilenameRegistry::new();
        let desired = dir.path().join("a.jpg");
        let got = registry.allocate(&desired, Path::new("/src/dirA/a.jpg"), CollisionStrategy::Hierarchical);
        assert_eq!(got, desired);
    }

    #[test]
    fn test_hierarchical_prefers_parent_then_hash_then_numeric() {
        let dir = tempdir().unwrap();
        let mut registry = FilenameRegistry::new();
        let desired = dir.path().join("a.jpg");
        let src_a = Path::new("/src/dirA/a.jpg");
        let src_b = Path::new("/src/dirB/a.jpg");

        assert_eq!(
            registry.allocate(&desired, src_a, CollisionStrategy::Hierarchical),
            desired
        );
        // Second source with the same basename gets the parent-dir suffix.
        assert_eq!(
            registry.allocate(&desired, src_b, CollisionStrategy::Hierarchical),
            dir.path().join("a_dirB.jpg")
        );
        // Same source again: parent name taken, falls through to hash.
        let hash = short_hash(&src_b.to_string_lossy());
        assert_eq!(
            registry.allocate(&desired, src_b, CollisionStrategy::Hierarchical),
            dir.path().join(format!("a_{hash}.jpg"))
        );
        // And once more: numeric suffix.
        assert_eq!(
            registry.allocate(&desired, src_b, CollisionStrategy::Hierarchical),
            dir.path().join("a_col_1.jpg")
        );
        assert_eq!(
            registry.allocate(&desired, src_b, CollisionStrategy::Hierarchical),
            dir.path().join("a_col_2.jpg")
        );
    }

    #[test]
    fn test_parent_only_skips_hash() {
        let dir = tempdir().unwrap();
        let mut registry = FilenameRegistry::new();
        let desired = dir.path().join("a.jpg");
        let src = Path::new("/src/dirB/a.jpg");

        registry.allocate(&desired, src, CollisionStrategy::ParentOnly);
        registry.allocate(&desired, src, CollisionStrategy::ParentOnly);
        // Parent suffix taken by the second call; third goes numeric.
        assert_eq!(
            registry.allocate(&desired, src, CollisionStrategy::ParentOnly),
            dir.path().join("a_col_1.jpg")
        );
    }

    #[test]
    fn test_hash_strategy() {
        let dir = tempdir().unwrap();
        let mut registry = FilenameRegistry::new();
        let desired = dir.path().join("a.jpg");
        let src = Path::new("/src/dirB/a.jpg");
        let hash = short_hash(&src.to_string_lossy());

        registry.allocate(&desired, src, CollisionStrategy::Hash);
        assert_eq!(
            registry.allocate(&desired, src, CollisionStrategy::Hash),
            dir.path().join(format!("a_{hash}.jpg"))
        );
        assert_eq!(
            registry.allocate(&desired, src, CollisionStrategy::Hash),
            dir.path().join("a_col_1.jpg")
        );
    }

    #[test]
    fn test_numeric_strategy() {
        let dir = tempdir().unwrap();
        let mut registry = FilenameRegistry::new();
        let desired = dir.path().join("a.jpg");
        let src = Path::new("/src/dirB/a.jpg");

        registry.allocate(&desired, src, CollisionStrategy::Numeric);
        assert_eq!(
            registry.allocate(&desired, src, CollisionStrategy::Numeric),
            dir.path().join("a_col_1.jpg")
        );
    }

    #[test]
    fn test_registry_seeds_from_existing_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();

        let mut registry = FilenameRegistry::new();
        let desired = dir.path().join("a.jpg");
        let got = registry.allocate(&desired, Path::new("/src/dirB/a.jpg"), CollisionStrategy::Hierarchical);
        assert_eq!(got, dir.path().join("a_dirB.jpg"));
    }

    #[test]
    fn test_reset_forgets_claims() {
        let dir = tempdir().unwrap();
        let mut registry = FilenameRegistry::new();
        let desired = dir.path().join("a.jpg");
        let src = Path::new("/src/dirA/a.jpg");

        assert_eq!(registry.allocate(&desired, src, CollisionStrategy::Numeric), desired);
        registry.reset();
        // Nothing on disk, so the same name is free again.
        assert_eq!(registry.allocate(&desired, src, CollisionStrategy::Numeric), desired);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "hierarchical".parse::<CollisionStrategy>().unwrap(),
            CollisionStrategy::Hierarchical
        );
        assert!("sideways".parse::<CollisionStrategy>().is_err());
    }
}
