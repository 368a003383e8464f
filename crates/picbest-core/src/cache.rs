use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::similarity::Embedding;

/// Cache file placed inside the output directory.
pub const CACHE_FILENAME: &str = ".embedding_cache.json";

/// Load cached embeddings keyed by absolute image path. A missing or
/// unreadable cache is treated as empty, never as an error.
pub fn load_cache(path: &Path) -> HashMap<PathBuf, Embedding> {
    if !path.exists() {
        debug!("cache file not found: {}", path.display());
        return HashMap::new();
    }
    let map: Result<HashMap<PathBuf, Embedding>, _> =
        File::open(path).map_err(anyhow::Error::from).and_then(|f| {
            serde_json::from_reader(BufReader::new(f)).map_err(anyhow::Error::from)
        });
    match map {
        Ok(map) => {
            debug!("loaded {} cached embeddings", map.len());
            map
        }
        Err(err) => {
            warn!("failed to load embedding cache {}: {err}", path.display());
            HashMap::new()
        }
    }
}

/// Merge `fresh` entries into whatever is on disk and write back
/// atomically (temp file + rename). Entries are only ever added, never
/// evicted; the cache grows across runs.
pub fn save_cache(path: &Path, fresh: &HashMap<PathBuf, Embedding>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut merged = load_cache(path);
    for (key, value) in fresh {
        merged.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let temp_path = path.with_file_name(".embedding_cache.tmp");
    let file = File::create(&temp_path)?;
    serde_json::to_writer(BufWriter::new(file), &merged)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_cache_is_empty() {
        let dir = tempdir().unwrap();
        assert!(load_cache(&dir.path().join(CACHE_FILENAME)).is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);
        let mut fresh = HashMap::new();
        fresh.insert(PathBuf::from("/img/a.jpg"), vec![1.0f32, 2.0, 3.0]);

        save_cache(&path, &fresh).unwrap();
        let loaded = load_cache(&path);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&PathBuf::from("/img/a.jpg")], vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_entries_accumulate_across_saves() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);

        let mut first = HashMap::new();
        first.insert(PathBuf::from("/img/a.jpg"), vec![1.0f32]);
        save_cache(&path, &first).unwrap();

        let mut second = HashMap::new();
        second.insert(PathBuf::from("/img/b.jpg"), vec![2.0f32]);
        save_cache(&path, &second).unwrap();

        // Both entries survive: merged in, never evicted.
        let loaded = load_cache(&path);
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_corrupt_cache_treated_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CACHE_FILENAME);
        fs::write(&path, b"not json at all").unwrap();
        assert!(load_cache(&path).is_empty());
    }
}
