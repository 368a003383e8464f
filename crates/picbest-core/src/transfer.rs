use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use filetime::FileTime;
use log::{debug, warn};

use crate::Error;

/// How files are placed at their destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    Copy,
    #[default]
    Symlink,
    Move,
}

impl FromStr for TransferMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "copy" => Ok(TransferMode::Copy),
            "symlink" => Ok(TransferMode::Symlink),
            "move" => Ok(TransferMode::Move),
            _ => Err(Error::Configuration(format!("unknown transfer mode: {s}"))),
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Copy preserving the source mtime.
fn copy_with_times(source: &Path, dest: &Path) -> anyhow::Result<()> {
    fs::copy(source, dest)
        .with_context(|| format!("copy {} -> {}", source.display(), dest.display()))?;
    if let Ok(meta) = fs::metadata(source) {
        if let Ok(mtime) = meta.modified() {
            filetime::set_file_mtime(dest, FileTime::from_system_time(mtime)).ok();
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_file(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Create a symlink at `link` pointing at `target`, falling back to a
/// hard link and finally a plain copy when the platform refuses.
pub fn create_link(target: &Path, link: &Path) -> anyhow::Result<()> {
    let target = absolute(target);
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link)?;
    }

    match symlink_file(&target, link) {
        Ok(()) => {
            debug!("created symlink {} -> {}", link.display(), target.display());
            Ok(())
        }
        Err(sym_err) => match fs::hard_link(&target, link) {
            Ok(()) => {
                debug!("created hard link {} -> {}", link.display(), target.display());
                Ok(())
            }
            Err(_) => {
                warn!(
                    "link failed for {} ({sym_err}); copying instead",
                    link.display()
                );
                copy_with_times(&target, link)
            }
        },
    }
}

/// Place `source` at `dest` using the given mode.
///
/// Moves fall back to copy-then-delete across devices. When moving with
/// `backlink`, a symlink pointing at the new location is left behind at
/// the original one.
pub fn transfer(
    source: &Path,
    dest: &Path,
    mode: TransferMode,
    backlink: bool,
) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match mode {
        TransferMode::Copy => copy_with_times(source, dest)?,
        TransferMode::Symlink => create_link(source, dest)?,
        TransferMode::Move => {
            if fs::rename(source, dest).is_err() {
                copy_with_times(source, dest)?;
                fs::remove_file(source).with_context(|| {
                    format!("remove {} after cross-device move", source.display())
                })?;
            }
            if backlink {
                create_link(dest, source)?;
            }
        }
    }
    Ok(())
}
