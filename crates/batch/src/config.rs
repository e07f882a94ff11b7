use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::error::BatchError;

/// Engine-level settings for a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// FFmpeg binary, resolved on the search path unless absolute
    pub ffmpeg_bin: PathBuf,
    /// Interval between subprocess exit checks and status redraws
    pub poll_interval_ms: u64,
    /// Delay before the single retry of a failed output cleanup
    pub cleanup_retry_delay_ms: u64,
    /// Width that input/output paths are padded or trimmed to in status lines
    pub status_name_width: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl BatchConfig {
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            poll_interval_ms: 100,
            cleanup_retry_delay_ms: 250,
            status_name_width: 42,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn cleanup_retry_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_retry_delay_ms)
    }
}

/// Per-run choices handed over by the argument parser
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Directory that structured moves are made relative to
    pub input_root: PathBuf,
    /// Output extension including the leading dot, or empty for none
    pub output_ext: String,
    /// Where outputs go; next to each input when unset
    pub output_dir: Option<PathBuf>,
    /// Destination root for moving processed inputs
    pub move_dir: Option<PathBuf>,
    pub copy_timestamps: bool,
    /// Engine arguments inserted between input and output, forwarded verbatim
    pub ffmpeg_params: Vec<String>,
}

impl BatchOptions {
    /// Reject options that would make every job fail before anything starts
    pub fn validate(&self) -> Result<(), BatchError> {
        if let Some(dir) = &self.move_dir {
            if !dir.is_dir() {
                return Err(BatchError::Config(format!(
                    "Move directory does not exist: {}",
                    dir.display()
                )));
            }
        }
        if let Some(dir) = &self.output_dir {
            if !dir.is_dir() {
                return Err(BatchError::Config(format!(
                    "Output directory does not exist: {}",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

/// Prefix a dot onto a bare extension; empty stays empty
pub fn normalize_extension(ext: &str) -> String {
    if ext.is_empty() || ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{}", ext)
    }
}
