//! MP4 structure repair via an external ffmpeg remux.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::error::MediaError;
use crate::MediaResult;

/// Remux a structurally broken MP4 in place.
///
/// Copies all streams without re-encoding and moves the container index
/// to the front of the file. The original is kept next to the repaired
/// file as `<path>.bak`; if the swap fails the original is restored.
pub fn repair_file(path: &Path) -> MediaResult<()> {
    info!(path = %path.display(), "starting MP4 structure repair");

    let probe = Command::new("ffmpeg").arg("-version").output();
    if !matches!(probe, Ok(ref output) if output.status.success()) {
        return Err(MediaError::RepairFailed(
            "ffmpeg is required for MP4 repair but was not found".to_string(),
        ));
    }

    // Analysis pass; the output is captured for the log only.
    let analysis = Command::new("ffmpeg")
        .args(["-v", "error", "-i"])
        .arg(path)
        .output();
    if let Ok(output) = analysis {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!(path = %path.display(), "problems found in file: {}", stderr.trim());
        }
    }

    info!(path = %path.display(), "remuxing with ffmpeg");
    let fixed = suffixed_path(path, ".fixed.mp4");
    let remux = Command::new("ffmpeg")
        .args(["-v", "warning", "-i"])
        .arg(path)
        .args(["-c", "copy", "-map", "0", "-movflags", "faststart", "-f", "mp4"])
        .arg(&fixed)
        .output()
        .map_err(|e| MediaError::RepairFailed(format!("could not run ffmpeg: {e}")))?;
    if !remux.status.success() {
        let stderr = String::from_utf8_lossy(&remux.stderr);
        let _ = fs::remove_file(&fixed);
        return Err(MediaError::RepairFailed(format!(
            "remux failed: {}",
            stderr.trim()
        )));
    }

    let backup = suffixed_path(path, ".bak");
    fs::rename(path, &backup)
        .map_err(|e| MediaError::RepairFailed(format!("could not back up original: {e}")))?;
    if let Err(e) = fs::rename(&fixed, path) {
        // Put the original back so the remaining attempts can still read it.
        let _ = fs::rename(&backup, path);
        let _ = fs::remove_file(&fixed);
        return Err(MediaError::RepairFailed(format!(
            "could not swap in repaired file: {e}"
        )));
    }

    info!(
        path = %path.display(),
        backup = %backup.display(),
        "MP4 repaired, original kept as backup"
    );
    Ok(())
}

fn suffixed_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixed_path_appends_to_full_name() {
        let path = Path::new("video/a.mp4");
        assert_eq!(suffixed_path(path, ".fixed.mp4"), Path::new("video/a.mp4.fixed.mp4"));
        assert_eq!(suffixed_path(path, ".bak"), Path::new("video/a.mp4.bak"));
    }
}
