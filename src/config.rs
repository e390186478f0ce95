//! Configuration types for the chat session controller.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ChatError, Result};

/// Top-level controller configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Remote history fetch settings.
    pub history: HistoryConfig,
    /// Local session cache settings.
    pub cache: CacheConfig,
    /// Run lifecycle settings.
    pub run: RunConfig,
    /// Session list settings.
    pub sessions: SessionsConfig,
}

/// Remote history fetch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of messages requested from `chat.history`.
    pub limit: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { limit: 200 }
    }
}

/// Local session cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Key under which the whole cache document is stored.
    ///
    /// Bump the suffix together with the schema version when the document
    /// shape changes so older data is never misread.
    pub storage_key: String,
    /// Pending attachments kept per session (most recent win).
    pub max_attachments: usize,
    /// Local voice-note entries kept per session (most recent win).
    pub max_voice_notes: usize,
    /// Directory for the filesystem key-value store (None = app data dir).
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage_key: "voxchat.session-cache.v1".to_owned(),
            max_attachments: 8,
            max_voice_notes: 24,
            dir: None,
        }
    }
}

/// Run lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Last-error text used when an `error` event carries no message.
    pub default_error_message: String,
    /// Clear a run whose stream has been open longer than this (None = never).
    pub dead_run_timeout_ms: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_error_message: "chat error".to_owned(),
            dead_run_timeout_ms: None,
        }
    }
}

/// Session list configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Maximum number of sessions requested from `sessions.list`.
    pub list_limit: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { list_limit: 50 }
    }
}

impl ChatConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChatError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ChatError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ChatError::Config(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ChatError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| {
            ChatError::Config(format!("failed to write {}: {e}", path.display()))
        })?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/voxchat/config.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }

    /// Directory used by the filesystem key-value store.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(crate::app_dirs::cache_store_dir)
    }

    /// Reject configurations that would make the controller useless.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.history.limit == 0 {
            return Err(ChatError::Config("history.limit must be > 0".into()));
        }
        if self.cache.storage_key.trim().is_empty() {
            return Err(ChatError::Config("cache.storage_key must not be empty".into()));
        }
        if self.cache.max_attachments == 0 {
            return Err(ChatError::Config("cache.max_attachments must be > 0".into()));
        }
        if self.cache.max_voice_notes == 0 {
            return Err(ChatError::Config("cache.max_voice_notes must be > 0".into()));
        }
        if self.run.dead_run_timeout_ms == Some(0) {
            return Err(ChatError::Config(
                "run.dead_run_timeout_ms must be > 0 when set".into(),
            ));
        }
        Ok(())
    }
}
