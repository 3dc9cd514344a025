use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::sync::SyncOptions;

/// Cache configuration, loaded from YAML. Every field has a default, so an
/// empty file is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PantryConfig {
    /// SQLite file backing the local cache
    pub database_path: PathBuf,
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info,pantry=debug`
    pub log_filter: String,
    /// Write logs here instead of stderr
    pub log_file: Option<PathBuf>,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub drain_on_reconnect: bool,
    pub resume_on_foreground: bool,
}

impl Default for PantryConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("pantry.db"),
            log_filter: "info".to_string(),
            log_file: None,
            sync: SyncConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        let options = SyncOptions::default();
        Self {
            drain_on_reconnect: options.drain_on_reconnect,
            resume_on_foreground: options.resume_on_foreground,
        }
    }
}

impl From<SyncConfig> for SyncOptions {
    fn from(config: SyncConfig) -> Self {
        SyncOptions {
            drain_on_reconnect: config.drain_on_reconnect,
            resume_on_foreground: config.resume_on_foreground,
        }
    }
}

impl PantryConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e)
        })?;
        Self::from_yaml(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML {}: {}", path.display(), e))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Relative database paths are resolved against `base` (usually the
    /// directory holding the config file).
    pub fn resolve_database_path(&self, base: &Path) -> PathBuf {
        if self.database_path.is_absolute() {
            self.database_path.clone()
        } else {
            base.join(&self.database_path)
        }
    }
}
