//! Configuration loading and config file resolution
//!
//! Settings come from, in priority order:
//! 1. Command-line flags (applied by the binary after loading)
//! 2. Config file named on the command line
//! 3. Config file named by the `MIXD_CONFIG` environment variable
//! 4. Platform config file (`~/.config/mixd/config.toml`, then `/etc/mixd/config.toml` on Linux)
//! 5. Built-in defaults
//!
//! A missing file found through the environment or the platform lookup is not
//! an error: the daemon logs a warning and starts with defaults. A file named
//! explicitly on the command line must exist.

use crate::timing;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "MIXD_CONFIG";

/// Daemon configuration
///
/// Fixed for the lifetime of a daemon: output format and pool size are never
/// renegotiated while running.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Output device name (None = platform default device)
    pub device: Option<String>,

    /// Requested output sample rate; the device may impose its own
    pub sample_rate: u32,

    /// Requested output channel count; the device may impose its own
    pub channels: u16,

    /// Number of allocatable player branches
    pub capacity: usize,

    /// Scheduler period in milliseconds
    pub tick_interval_ms: u64,

    /// Virtual device bridge queue size, in milliseconds of audio
    pub bridge_capacity_ms: u64,

    /// Device buffer size in frames (None = device default)
    pub sink_buffer_frames: Option<u32>,

    /// Name advertised by the virtual device
    pub virtual_device_name: String,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 44100,
            channels: 2,
            capacity: 10,
            tick_interval_ms: 10,
            bridge_capacity_ms: 200,
            sink_buffer_frames: None,
            virtual_device_name: "Sound Daemon".to_string(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration following the documented priority order.
    ///
    /// # Arguments
    /// - `cli_path`: Config file given on the command line, if any
    ///
    /// # Errors
    /// - `cli_path` given but unreadable
    /// - Any config file that exists but fails to parse or validate
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            info!("Loading config from command line path: {}", path.display());
            return Self::from_file(path);
        }

        match resolve_config_path() {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Self::from_file(&path)
            }
            None => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        debug!("Parsed config: {:?}", config);
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config("capacity must be at least 1".to_string()));
        }
        if self.channels == 0 {
            return Err(Error::Config("channels must be at least 1".to_string()));
        }
        if !timing::is_supported_rate(self.sample_rate) {
            return Err(Error::Config(format!(
                "sample_rate {} outside supported range {}..={}",
                self.sample_rate,
                timing::MIN_SAMPLE_RATE,
                timing::MAX_SAMPLE_RATE
            )));
        }
        if !(1..=100).contains(&self.tick_interval_ms) {
            return Err(Error::Config(format!(
                "tick_interval_ms {} outside 1..=100",
                self.tick_interval_ms
            )));
        }
        if self.bridge_capacity_ms < self.tick_interval_ms {
            return Err(Error::Config(format!(
                "bridge_capacity_ms {} shorter than one tick ({} ms)",
                self.bridge_capacity_ms, self.tick_interval_ms
            )));
        }
        Ok(())
    }

    /// Scheduler period
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Locate a config file through the environment or the platform config dirs.
///
/// Returns None when no candidate file exists.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        warn!(
            "{} points to missing file {}, ignoring",
            CONFIG_ENV_VAR,
            path.display()
        );
    }

    platform_config_candidates().into_iter().find(|p| p.exists())
}

/// Platform config file locations, most specific first
fn platform_config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("mixd").join("config.toml"));
    }
    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/etc/mixd/config.toml"));
    }

    candidates
}
