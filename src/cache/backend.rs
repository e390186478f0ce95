//! Key-value storage capability and its implementations.
//!
//! [`KeyValueStore`] is the string get/set/remove seam the session
//! cache writes through. Two implementations ship with the crate:
//!
//! - [`MemoryKeyValueStore`]: process-local, optionally with a byte quota
//!   to reproduce "quota exceeded" failures.
//! - [`FsKeyValueStore`]: one file per key, written atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};

/// String key-value storage. Every call may fail.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key is absent.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write (overwrite) a value.
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Succeeds when the key was absent.
    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// In-memory key-value store.
///
/// Values live in an `Arc<RwLock<HashMap>>`; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    items: Arc<RwLock<HashMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects writes pushing the total size of keys and
    /// values past `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: Arc::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self.items.write().await;
        if let Some(quota) = self.quota_bytes {
            let others: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let total = others + key.len() + value.len();
            if total > quota {
                return Err(ChatError::Storage(format!(
                    "quota exceeded: {total} bytes > {quota} bytes"
                )));
            }
        }
        items.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.write().await.remove(key);
        Ok(())
    }
}

/// Filesystem-backed key-value store.
///
/// Each key is stored as `{data_dir}/{sanitized key}.json`. Writes go to a
/// temp file that is fsynced and renamed into place.
#[derive(Debug, Clone)]
pub struct FsKeyValueStore {
    data_dir: PathBuf,
}

impl FsKeyValueStore {
    /// Create a store rooted at `data_dir`, creating the directory.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Storage`] if the directory cannot be created.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            ChatError::Storage(format!(
                "failed to create cache directory {}: {e}",
                data_dir.display()
            ))
        })?;
        Ok(Self { data_dir })
    }

    /// Create a store in the configured cache directory
    /// ([`ChatConfig::cache_dir`]).
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Storage`] if the directory cannot be created.
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        Self::new(config.cache_dir())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn item_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", sanitize_key(key)))
    }
}

/// Map a key onto a safe file stem.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_owned()
}

#[async_trait]
impl KeyValueStore for FsKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let path = self.item_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ChatError::Storage(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.item_path(key);
        let tmp_path = self.data_dir.join(format!(".{}.tmp", sanitize_key(key)));
        tokio::fs::write(&tmp_path, value.as_bytes())
            .await
            .map_err(|e| {
                ChatError::Storage(format!(
                    "failed to write temp file {}: {e}",
                    tmp_path.display()
                ))
            })?;

        if let Ok(file) = tokio::fs::File::open(&tmp_path).await {
            let _ = file.sync_all().await;
        }

        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            ChatError::Storage(format!(
                "failed to rename temp file to {}: {e}",
                path.display()
            ))
        })
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let path = self.item_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChatError::Storage(format!(
                "failed to delete {}: {e}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn memory_store_crud() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.get_item("k").await.unwrap(), None);
        store.set_item("k", "v1").await.unwrap();
        store.set_item("k", "v2").await.unwrap();
        assert_eq!(store.get_item("k").await.unwrap().as_deref(), Some("v2"));
        store.remove_item("k").await.unwrap();
        store.remove_item("k").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn memory_clones_share_items() {
        let store = MemoryKeyValueStore::new();
        let clone = store.clone();
        store.set_item("k", "v").await.unwrap();
        assert_eq!(clone.get_item("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn quota_rejects_oversized_write_and_keeps_old_value() {
        let store = MemoryKeyValueStore::with_quota(10);
        store.set_item("k", "small").await.unwrap();
        let err = store.set_item("k", "far too large").await.unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
        assert_eq!(store.get_item("k").await.unwrap().as_deref(), Some("small"));
    }

    #[tokio::test]
    async fn fs_store_round_trips_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsKeyValueStore::new(dir.path().join("kv")).expect("store");
        store.set_item("voxchat.session-cache.v1", "{}").await.unwrap();
        assert_eq!(
            store
                .get_item("voxchat.session-cache.v1")
                .await
                .unwrap()
                .as_deref(),
            Some("{}")
        );
        let names: Vec<String> = std::fs::read_dir(store.data_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["voxchat.session-cache.v1.json".to_owned()]);
    }

    #[tokio::test]
    async fn fs_store_missing_key_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsKeyValueStore::new(dir.path()).expect("store");
        assert_eq!(store.get_item("absent").await.unwrap(), None);
        store.remove_item("absent").await.unwrap();
    }

    #[tokio::test]
    async fn fs_store_uses_configured_cache_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ChatConfig::default();
        config.cache.dir = Some(dir.path().join("cache"));
        let store = FsKeyValueStore::from_config(&config).expect("store");
        assert_eq!(store.data_dir(), dir.path().join("cache"));
        store.set_item("k", "v").await.unwrap();
        assert!(dir.path().join("cache").join("k.json").exists());
    }

    #[test]
    fn keys_cannot_escape_the_directory() {
        assert_eq!(sanitize_key("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_key("a/b c"), "a_b_c");
    }
}
