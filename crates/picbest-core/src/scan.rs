use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info};
use regex::Regex;

use crate::record::ImageRecord;
use crate::{Error, ThrottledProgress};

/// Extensions considered images when no explicit list is configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "bmp", "jpg", "jpeg", "png", "webp", "gif", "tiff", "tif", "jp2", "heif", "heic",
];

/// How include/exclude name patterns are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatternMode {
    #[default]
    Glob,
    Regex,
}

impl FromStr for PatternMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "glob" => Ok(PatternMode::Glob),
            "regex" => Ok(PatternMode::Regex),
            _ => Err(Error::Configuration(format!("unknown pattern mode: {s}"))),
        }
    }
}

/// Translate a glob into an anchored regex. Supports `*`, `?` and
/// `[...]` character classes; everything else is matched literally.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    out.push(inner);
                }
                out.push(']');
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

fn compile_patterns(patterns: &[String], mode: PatternMode) -> Result<Vec<Regex>, Error> {
    patterns
        .iter()
        .map(|p| {
            let source = match mode {
                PatternMode::Glob => glob_to_regex(p),
                PatternMode::Regex => p.clone(),
            };
            Regex::new(&source)
                .map_err(|e| Error::Configuration(format!("invalid pattern '{p}': {e}")))
        })
        .collect()
}

/// Compiled include/exclude filters applied to directory and file names.
#[derive(Debug, Default)]
pub struct NameFilters {
    include_dirs: Vec<Regex>,
    include_files: Vec<Regex>,
    exclude_dirs: Vec<Regex>,
    exclude_files: Vec<Regex>,
}

impl NameFilters {
    pub fn compile(
        include_dirs: &[String],
        include_files: &[String],
        exclude_dirs: &[String],
        exclude_files: &[String],
        mode: PatternMode,
    ) -> Result<Self, Error> {
        Ok(Self {
            include_dirs: compile_patterns(include_dirs, mode)?,
            include_files: compile_patterns(include_files, mode)?,
            exclude_dirs: compile_patterns(exclude_dirs, mode)?,
            exclude_files: compile_patterns(exclude_files, mode)?,
        })
    }

    fn allowed(name: &str, include: &[Regex], exclude: &[Regex]) -> bool {
        let included = include.is_empty() || include.iter().any(|re| re.is_match(name));
        let excluded = exclude.iter().any(|re| re.is_match(name));
        included && !excluded
    }

    fn dir_allowed(&self, name: &str) -> bool {
        Self::allowed(name, &self.include_dirs, &self.exclude_dirs)
    }

    fn file_allowed(&self, name: &str) -> bool {
        Self::allowed(name, &self.include_files, &self.exclude_files)
    }
}

/// Traversal behavior and file-level filters.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Lowercase extensions without dots; empty means "any file whose
    /// guessed mime type is image/*"
    pub extensions: Vec<String>,
    /// Absolute directory prefixes to skip entirely
    pub exclude_dirs: Vec<PathBuf>,
    pub recursive: bool,
    pub follow_symlinks: bool,
    pub min_file_size_kb: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            exclude_dirs: Vec::new(),
            recursive: true,
            follow_symlinks: false,
            min_file_size_kb: 0,
        }
    }
}

fn is_image_candidate(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return mime_guess::from_path(path)
            .first()
            .map_or(false, |mime| mime.type_() == mime_guess::mime::IMAGE);
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Find image files under the input directories.
pub fn find_images(
    input_dirs: &[PathBuf],
    options: &ScanOptions,
    filters: &NameFilters,
    progress: &ThrottledProgress,
) -> Vec<ImageRecord> {
    let mut records = Vec::new();
    let total = input_dirs.len() as u64;
    for (idx, dir) in input_dirs.iter().enumerate() {
        info!("scanning directory [{}/{}]: {}", idx + 1, total, dir.display());
        progress.report("scan", idx as u64, total, &dir.display().to_string());
        walk(dir, options, filters, &mut records);
    }
    info!("found {} valid images", records.len());
    records
}

fn walk(dir: &Path, options: &ScanOptions, filters: &NameFilters, records: &mut Vec<ImageRecord>) {
    let Ok(entries) = fs::read_dir(dir) else {
        debug!("cannot read directory: {}", dir.display());
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() || (file_type.is_symlink() && path.is_dir()) {
            if !options.recursive {
                continue;
            }
            if file_type.is_symlink() && !options.follow_symlinks {
                debug!("skipping symlinked directory: {}", path.display());
                continue;
            }
            if options.exclude_dirs.iter().any(|ex| path.starts_with(ex)) {
                debug!("skipping excluded directory: {}", path.display());
                continue;
            }
            if !filters.dir_allowed(&name) {
                debug!("skipping directory by pattern: {}", path.display());
                continue;
            }
            walk(&path, options, filters, records);
            continue;
        }

        if !filters.file_allowed(&name) || !is_image_candidate(&path, &options.extensions) {
            continue;
        }
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        if options.min_file_size_kb > 0 && meta.len() < options.min_file_size_kb * 1024 {
            continue;
        }
        records.push(ImageRecord::new(path, meta.len()));
    }
}
