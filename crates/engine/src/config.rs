//! History configuration via `history.toml`
//!
//! A document context keeps one `history.toml` next to its data. On first
//! open a commented default is written; edits take effect the next time an
//! engine is built from the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use timeline_core::{HistoryError, Result, StoragePolicy};

/// Config file name placed next to the document
pub const CONFIG_FILE_NAME: &str = "history.toml";

/// Engine configuration loaded from `history.toml`
///
/// # Example
///
/// ```toml
/// capacity = 100
/// merge_window_ms = 500
/// persistence_enabled = true
/// memory_only_types = ["PointCloud"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Undo entries kept in memory before the oldest are flushed and evicted
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Edits closer together than this may merge into one entry
    #[serde(default = "default_merge_window_ms")]
    pub merge_window_ms: u64,
    /// When false, commands are never persisted or snapshotted and
    /// `to_json` produces an empty document
    #[serde(default = "default_persistence_enabled")]
    pub persistence_enabled: bool,
    /// Target type tags that are never handed to the persistence channel
    #[serde(default)]
    pub memory_only_types: Vec<String>,
    /// Directory for the fallback spool written after durability failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spool_dir: Option<PathBuf>,
}

fn default_capacity() -> usize {
    100
}

fn default_merge_window_ms() -> u64 {
    500
}

fn default_persistence_enabled() -> bool {
    true
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            merge_window_ms: default_merge_window_ms(),
            persistence_enabled: default_persistence_enabled(),
            memory_only_types: Vec::new(),
            spool_dir: None,
        }
    }
}

impl HistoryConfig {
    /// Merge window as a duration
    pub fn merge_window(&self) -> Duration {
        Duration::from_millis(self.merge_window_ms)
    }

    /// Storage policy built from `memory_only_types`
    pub fn storage_policy(&self) -> StoragePolicy {
        StoragePolicy::with_memory_only(self.memory_only_types.iter().cloned())
    }

    /// Check invariants the engine relies on
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(HistoryError::invalid(
                "Invalid capacity 0 in history.toml. Expected at least 1.",
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# History configuration
#
# Undo entries kept in memory. When exceeded, the oldest durable entries
# are flushed to the persistence channel and evicted (default: 100).
capacity = 100

# Consecutive mergeable edits of the same kind on the same target that
# arrive within this many milliseconds collapse into one entry (default: 500).
merge_window_ms = 500

# Persist commands and keep serialized snapshots (default: true).
# When false, toJSON output is empty until serialization is re-enabled.
persistence_enabled = true

# Target type tags that are never persisted and never evicted.
memory_only_types = []

# Directory for the fallback spool used when persistence fails.
# spool_dir = "history-spool"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HistoryError::invalid(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            HistoryError::Serialization(msg) => HistoryError::Serialization(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                msg
            )),
            other => other,
        })
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: HistoryConfig =
            toml::from_str(content).map_err(|e| HistoryError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HistoryError::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
