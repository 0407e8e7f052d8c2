//! Server-side configuration.
//!
//! Reads a TOML file of the shape:
//!
//! ```toml
//! [storage]
//! data-dir = "/var/lib/chime"
//!
//! [sweep]
//! due-check-interval-secs = 60
//! recurrence-interval-secs = 3600
//! ```
//!
//! Every key is optional; a missing file yields the defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for all on-disk state.
    #[serde(rename = "data-dir", default = "default_data_dir")]
    pub data_dir: String,

    /// Explicit SQLite path. Defaults to `<data-dir>/chime.db`.
    #[serde(rename = "sqlite-path", default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sqlite_path: None,
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

/// Sweep cadence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Seconds between due-date checks.
    #[serde(rename = "due-check-interval-secs", default = "default_due_check_interval")]
    pub due_check_interval_secs: u64,

    /// Seconds between recurring-template expansions.
    #[serde(rename = "recurrence-interval-secs", default = "default_recurrence_interval")]
    pub recurrence_interval_secs: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            due_check_interval_secs: default_due_check_interval(),
            recurrence_interval_secs: default_recurrence_interval(),
        }
    }
}

fn default_due_check_interval() -> u64 {
    60
}

fn default_recurrence_interval() -> u64 {
    3600
}

/// Server configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sweep: SweepSettings,
}

impl ServerConfig {
    /// Load config from disk, or return defaults if the file doesn't exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Path of the SQLite database file.
    pub fn resolve_sqlite_path(&self) -> PathBuf {
        match &self.storage.sqlite_path {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from(&self.storage.data_dir).join("chime.db"),
        }
    }
}
