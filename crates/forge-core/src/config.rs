use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::id::AggregateKind;

/// File name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "forge.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub counters: CounterConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSection {
    /// Re-fold the log and compare it with the cached state on every read.
    #[serde(default)]
    pub verify_on_read: bool,
}

/// Names of the sequence counters used for human-readable numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterConfig {
    #[serde(default = "default_issue_counter")]
    pub issues: String,
    #[serde(default = "default_pull_request_counter")]
    pub pull_requests: String,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            issues: default_issue_counter(),
            pull_requests: default_pull_request_counter(),
        }
    }
}

impl CounterConfig {
    #[must_use]
    pub fn name_for(&self, kind: AggregateKind) -> &str {
        match kind {
            AggregateKind::Issue => &self.issues,
            AggregateKind::PullRequest => &self.pull_requests,
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".forge/aggregates.db")
}

fn default_issue_counter() -> String {
    "issues".to_string()
}

fn default_pull_request_counter() -> String {
    "pull_requests".to_string()
}

/// Parse a config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid TOML for
/// [`EngineConfig`].
pub fn load_config_file(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<EngineConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Resolve the effective config: `explicit` if given, else `./forge.toml`,
/// else the user config dir, else defaults.
///
/// # Errors
///
/// Returns an error if an explicit path is missing, or if a discovered file
/// cannot be parsed.
pub fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = explicit {
        return load_config_file(path);
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return load_config_file(&local);
    }

    if let Some(path) = user_config_path() {
        if path.exists() {
            return load_config_file(&path);
        }
    }

    Ok(EngineConfig::default())
}

/// `<config dir>/forge/config.toml`, if the platform has a config dir.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("forge").join("config.toml"))
}
