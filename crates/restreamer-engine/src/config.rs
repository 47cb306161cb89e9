//! Runtime configuration loaded from `config.json`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Errors that make startup impossible.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub rtmp: RtmpConfig,
    pub video: VideoConfig,
    pub settings: StreamSettings,
}

/// RTMP endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RtmpConfig {
    pub url: String,
    pub key: String,
}

/// Input directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoConfig {
    pub directory: String,

    /// Reserved; the supervisor always loops over the directory.
    pub loop_mode: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            directory: "video".to_string(),
            loop_mode: true,
        }
    }
}

/// Tunables for the send loop and supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Target bitrate in bits per second; 0 uses the default floor.
    pub force_bitrate: u64,

    /// Mark video packets as keyframes on a wall-clock cadence.
    pub force_keyframe: bool,

    /// Cadence for forced keyframes, in seconds.
    pub keyframe_seconds: u64,

    /// Reserved; the sink is dialed once per file attempt regardless.
    pub reconnect_on_new_file: bool,

    /// Always play files to their natural end.
    pub disable_early_end: bool,

    /// Minimum seconds each file stays on air.
    pub min_play_time: u64,

    /// Resume from the saved checkpoint at startup.
    pub restore_state: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            force_bitrate: 0,
            force_keyframe: false,
            keyframe_seconds: 2,
            reconnect_on_new_file: true,
            disable_early_end: false,
            min_play_time: 60,
            restore_state: true,
        }
    }
}

impl Config {
    /// Load `path`, writing and using defaults when it does not exist.
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::placeholder();
                match serde_json::to_vec_pretty(&config) {
                    Ok(json) => {
                        if let Err(e) = fs::write(path, json) {
                            warn!("could not write default configuration: {e}");
                        } else {
                            info!(path = %path.display(), "wrote default configuration");
                        }
                    }
                    Err(e) => warn!("could not serialize default configuration: {e}"),
                }
                return Ok(config);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Configuration written on first run.
    fn placeholder() -> Self {
        let mut config = Self::default();
        config.rtmp.url = "rtmp://live.example.com/input/".to_string();
        config.rtmp.key = "stream-key".to_string();
        config
    }

    /// Full publish URL: base URL and key concatenated verbatim.
    pub fn publish_url(&self) -> String {
        format!("{}{}", self.rtmp.url, self.rtmp.key)
    }

    /// Effective minimum play time, falling back to the default when unset.
    pub fn min_play_time(&self) -> Duration {
        if self.settings.min_play_time > 0 {
            Duration::from_secs(self.settings.min_play_time)
        } else {
            crate::MIN_PLAY_TIME
        }
    }

    /// Effective target bitrate: the forced value or the default floor.
    pub fn target_bitrate(&self) -> u64 {
        if self.settings.force_bitrate > 0 {
            self.settings.force_bitrate
        } else {
            crate::MIN_BITRATE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = StreamSettings::default();
        assert_eq!(settings.keyframe_seconds, 2);
        assert_eq!(settings.min_play_time, 60);
        assert!(settings.reconnect_on_new_file);
        assert!(settings.restore_state);
        assert!(!settings.disable_early_end);
        assert!(!settings.force_keyframe);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "rtmp": { "url": "rtmp://ingest.example.net/live/", "key": "abc" },
            "video": { "directory": "clips", "loopMode": true },
            "settings": {
                "forceBitrate": 2500000,
                "forceKeyframe": true,
                "keyframeSeconds": 4,
                "disableEarlyEnd": true,
                "minPlayTime": 30,
                "restoreState": false
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.video.directory, "clips");
        assert_eq!(config.settings.force_bitrate, 2_500_000);
        assert_eq!(config.settings.keyframe_seconds, 4);
        assert!(config.settings.disable_early_end);
        assert!(!config.settings.restore_state);
        // Missing fields keep their defaults.
        assert!(config.settings.reconnect_on_new_file);
    }

    #[test]
    fn test_publish_url_concatenates_without_separator() {
        let mut config = Config::default();
        config.rtmp.url = "rtmp://host/input/".to_string();
        config.rtmp.key = "secret".to_string();
        assert_eq!(config.publish_url(), "rtmp://host/input/secret");
    }

    #[test]
    fn test_effective_values() {
        let mut config = Config::default();
        assert_eq!(config.target_bitrate(), crate::MIN_BITRATE);
        assert_eq!(config.min_play_time(), Duration::from_secs(60));

        config.settings.force_bitrate = 3_000_000;
        config.settings.min_play_time = 0;
        assert_eq!(config.target_bitrate(), 3_000_000);
        assert_eq!(config.min_play_time(), crate::MIN_PLAY_TIME);
    }

    #[test]
    fn test_load_or_init_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.video.directory, "video");
        assert!(config.rtmp.url.starts_with("rtmp://"));

        // A second load reads the file that was just written.
        let reloaded = Config::load_or_init(&path).unwrap();
        assert_eq!(reloaded.rtmp.key, config.rtmp.key);
    }
}
