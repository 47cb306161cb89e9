//! Directory scanning for playable files.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// One playable file from a scan snapshot.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

/// Snapshot the `.mp4` files under `dir`, sorted by name for a
/// deterministic play order. Directories and other files are skipped.
pub fn scan_directory(dir: impl AsRef<Path>) -> Vec<FileEntry> {
    let dir = dir.as_ref();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "could not read video directory: {e}");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.to_lowercase().ends_with(".mp4") {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(FileEntry {
            name: name.to_string(),
            size,
            path,
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));

    if !files.is_empty() {
        info!("found {} MP4 files to stream", files.len());
        for file in &files {
            info!("  {} ({:.2} MB)", file.name, file.size as f64 / (1024.0 * 1024.0));
        }
    }
    files
}
