//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::timebase::FrameRate;

/// Global application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default encoder settings.
    #[serde(default)]
    pub encoder: EncoderDefaults,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default encoding parameters applied when a recorder is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderDefaults {
    /// Backend name: "ffmpeg", "libav" or "raw".
    pub backend: String,

    /// Default frame rate.
    pub frame_rate: FrameRate,

    /// Encoder speed/quality preset (libx264 naming).
    pub preset: String,

    /// Keyframe interval in frames.
    pub gop_size: u32,

    /// Maximum consecutive B-frames.
    pub max_b_frames: u32,

    /// Append the MPEG sequence end code when a stream is closed.
    pub write_terminator: bool,

    /// Flip incoming buffers vertically (bottom-up sources such as GL readbacks).
    pub flip_y: bool,

    /// Look-ahead depth of the raw backend, in frames.
    pub raw_lookahead: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "framerec=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for EncoderDefaults {
    fn default() -> Self {
        Self {
            backend: "ffmpeg".to_string(),
            frame_rate: FrameRate::FPS_30,
            preset: "slow".to_string(),
            gop_size: 10,
            max_b_frames: 1,
            write_terminator: false,
            flip_y: true,
            raw_lookahead: 2,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load_from(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                Self::default()
            }
        }
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> crate::error::FramerecResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("framerec").join("config.json")
}
