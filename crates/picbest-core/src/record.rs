use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ImageRecord {
    /// Absolute path of the image on disk; doubles as its identifier
    pub path: PathBuf,
    /// File size in bytes at scan time
    pub size: u64,
}

impl ImageRecord {
    pub fn new(path: PathBuf, size: u64) -> Self {
        Self { path, size }
    }
}
