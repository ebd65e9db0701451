//! Configuration module for dkr-reload
//!
//! This module handles the on-disk configuration of the loader, the hot-reload
//! watcher and the reconnect policy. Every field has a default, so a missing or
//! partial file is always valid.
//!
//! # Config Location
//!
//! The first existing file wins:
//! - An explicit path (the `--config` flag)
//! - `./dkr-reload.toml`
//! - `<config dir>/dkr-reload/config.toml`:
//!   - **Linux**: `~/.config/dkr-reload/config.toml`
//!   - **macOS**: `~/Library/Application Support/dkr-reload/config.toml`
//!   - **Windows**: `%APPDATA%\dkr-reload\config.toml`
//!
//! # Example
//!
//! ```toml
//! [loader]
//! program = "UNFLoader"
//!
//! [hot_reload]
//! artifact_file_name = "dkr_code.bin"
//! poll_interval_ms = 1000
//!
//! [reconnect]
//! base_delay_ms = 1000
//! step_ms = 500
//! max_steps = 5
//! ```

use crate::error::{ReloadError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "dkr-reload";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "dkr-reload.toml";

/// Config file name inside the platform config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Default loader executable
#[cfg(windows)]
pub const DEFAULT_LOADER_PROGRAM: &str = "UNFLoader.exe";
/// Default loader executable
#[cfg(not(windows))]
pub const DEFAULT_LOADER_PROGRAM: &str = "UNFLoader";

/// File written next to the ROM by the build whenever reloadable code changes
pub const DEFAULT_ARTIFACT_FILE_NAME: &str = "dkr_code.bin";

/// Default hot-reload poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default delay before the first reconnect attempt in milliseconds
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1000;

/// Default delay added per failed attempt in milliseconds
pub const DEFAULT_RECONNECT_STEP_MS: u64 = 500;

/// Default cap on the number of steps added to the base delay
pub const DEFAULT_RECONNECT_MAX_STEPS: u32 = 5;

/// Get the platform config file path
pub fn user_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Loader executable configuration
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Hot-reload watcher configuration
    #[serde(default)]
    pub hot_reload: HotReloadConfig,

    /// Reconnect backoff configuration
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl AppConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ReloadError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReloadError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::from_toml_str(&content).with_context(|| format!("{:?}", path))
    }

    /// Resolve and load the configuration
    ///
    /// An explicit path must exist. Otherwise the local and user config files
    /// are tried in order, falling back to defaults when neither exists.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let candidates = std::iter::once(PathBuf::from(LOCAL_CONFIG_FILE)).chain(user_config_path());
        for candidate in candidates {
            if candidate.is_file() {
                tracing::info!("Loading config from {:?}", candidate);
                return Self::load(&candidate);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Serialize this configuration to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ReloadError::Config(format!("Failed to serialize config: {}", e)))
    }
}

// ==================== Loader Config ====================

/// External loader executable configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Executable name (resolved on PATH) or path
    #[serde(default = "default_loader_program")]
    pub program: PathBuf,

    /// Extra arguments appended after the fixed ones
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_loader_program() -> PathBuf {
    PathBuf::from(DEFAULT_LOADER_PROGRAM)
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            program: default_loader_program(),
            extra_args: Vec::new(),
        }
    }
}

// ==================== Hot Reload Config ====================

/// Hot-reload watcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotReloadConfig {
    /// Artifact file name, looked up next to the selected ROM
    #[serde(default = "default_artifact_file_name")]
    pub artifact_file_name: String,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_artifact_file_name() -> String {
    DEFAULT_ARTIFACT_FILE_NAME.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl HotReloadConfig {
    /// Poll interval as a duration, never zero
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            artifact_file_name: default_artifact_file_name(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

// ==================== Reconnect Config ====================

/// Reconnect backoff configuration
///
/// The delay after the n-th consecutive death is
/// `base_delay_ms + min(n, max_steps) * step_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_base_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_reconnect_step_ms")]
    pub step_ms: u64,

    #[serde(default = "default_reconnect_max_steps")]
    pub max_steps: u32,
}

fn default_reconnect_base_ms() -> u64 {
    DEFAULT_RECONNECT_BASE_MS
}

fn default_reconnect_step_ms() -> u64 {
    DEFAULT_RECONNECT_STEP_MS
}

fn default_reconnect_max_steps() -> u32 {
    DEFAULT_RECONNECT_MAX_STEPS
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_RECONNECT_BASE_MS,
            step_ms: DEFAULT_RECONNECT_STEP_MS,
            max_steps: DEFAULT_RECONNECT_MAX_STEPS,
        }
    }
}

// ==================== Tests ====================
