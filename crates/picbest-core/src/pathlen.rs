use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use sha2::{Digest, Sha256};

/// Default maximum destination path length, chosen to stay under
/// common OS limits.
pub const MAX_PATH_LENGTH: usize = 250;

/// Result of a length check: the path to use, plus the sidecar location
/// when the name had to be shortened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedPath {
    pub path: PathBuf,
    pub sidecar: Option<PathBuf>,
}

/// First 8 hex chars of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))[..8].to_string()
}

/// Shorten `original` so it fits within `max_length` characters.
///
/// Within the limit the path is returned unchanged with no sidecar.
/// Otherwise the stem is truncated and suffixed with `_` plus an 8-hex
/// hash of the original stem, the extension is preserved, and the
/// sidecar path (shortened stem + ".txt") is returned alongside.
/// Deterministic for a given stem, and a no-op when re-applied to its
/// own output. The shortened name is not collision-checked here; it
/// still goes through the placer.
pub fn create_safe_path(original: &Path, max_length: usize) -> GuardedPath {
    let full = original.to_string_lossy();
    let full_len = full.chars().count();
    if full_len <= max_length {
        return GuardedPath {
            path: original.to_path_buf(),
            sidecar: None,
        };
    }

    let excess = full_len - max_length;
    let dir = original.parent().unwrap_or_else(|| Path::new(""));
    let stem = original
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let ext = original.extension().and_then(|s| s.to_str()).unwrap_or("");

    let keep = stem.chars().count().saturating_sub(excess + 10).max(3);
    let truncated: String = stem.chars().take(keep).collect();
    let shortened = format!("{}_{}", truncated, short_hash(stem));

    let filename = if ext.is_empty() {
        shortened.clone()
    } else {
        format!("{shortened}.{ext}")
    };

    GuardedPath {
        path: dir.join(filename),
        sidecar: Some(dir.join(format!("{shortened}.txt"))),
    }
}

/// Write the sidecar record for a shortened path: the original path,
/// the creation time, and caller-supplied context fields.
pub fn write_sidecar(
    sidecar: &Path,
    original: &Path,
    context: &[(&str, String)],
) -> anyhow::Result<()> {
    if let Some(parent) = sidecar.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut body = String::new();
    writeln!(body, "Original path: {}", original.display())?;
    writeln!(body, "Created: {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    for (key, value) in context {
        writeln!(body, "{key}: {value}")?;
    }
    fs::write(sidecar, body)?;
    Ok(())
}
