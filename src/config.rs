//! Replay configuration
//!
//! Settings are read from a camelCase JSON file. Every field has a
//! default, so a partial file or no file at all is valid.

use crate::buffer::window_capacity;
use crate::export::{ExportOptions, FailedFilePolicy, UnknownTimestampPolicy};
use crate::path::PathTemplate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default output path template
pub const DEFAULT_OUTPUT_FILE: &str = "~/Videos/Replay_%Y-%m-%d_%H-%M-%S.mp4";

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "instant_replay=info";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplayConfig {
    /// `strftime` template for saved files, `~` expands to the home directory
    pub output_file: String,
    /// Length of the replay window in seconds
    pub record_seconds: u32,
    /// Expected encoder frame rate, used to size the buffer
    pub frame_rate: u32,
    /// FFmpeg executable used for muxing
    pub ffmpeg_path: PathBuf,
    pub unknown_timestamps: UnknownTimestampPolicy,
    pub failed_files: FailedFilePolicy,
    /// Create missing parent directories of the output file
    pub create_output_dirs: bool,
    /// Fallback tracing filter
    pub log_filter: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            output_file: DEFAULT_OUTPUT_FILE.to_string(),
            record_seconds: 30,
            frame_rate: 30,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            unknown_timestamps: UnknownTimestampPolicy::default(),
            failed_files: FailedFilePolicy::default(),
            create_output_dirs: true,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ReplayConfig {
    /// Load and validate the configuration at `path`.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: ReplayConfig = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Default config file location (`<config dir>/instant-replay/config.json`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("instant-replay").join("config.json"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_file.trim().is_empty() {
            return Err(ConfigError::Invalid("outputFile must not be empty".to_string()));
        }
        if self.record_seconds == 0 {
            return Err(ConfigError::Invalid(
                "recordSeconds must be at least 1".to_string(),
            ));
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::Invalid("frameRate must be at least 1".to_string()));
        }
        if self.ffmpeg_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("ffmpegPath must not be empty".to_string()));
        }
        Ok(())
    }

    /// Number of packets the replay buffer must hold
    pub fn buffer_capacity(&self) -> usize {
        window_capacity(self.record_seconds, self.frame_rate)
    }

    pub fn path_template(&self) -> PathTemplate {
        PathTemplate::new(self.output_file.clone()).create_dirs(self.create_output_dirs)
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            failed_files: self.failed_files,
            unknown_timestamps: self.unknown_timestamps,
        }
    }
}
