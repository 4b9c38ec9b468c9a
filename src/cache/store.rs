use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

/// Key-value persistence used by the result cache.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Option<Value>;

    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Lives as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let entries = self.entries.lock().await;
        entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().await.clear();
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    value: Value,
    expires_at: DateTime<Utc>,
}

type Namespace = HashMap<String, Entry>;

/// One JSON document per namespace under `dir`; entries expire after `ttl`.
pub struct FileStore {
    dir: PathBuf,
    ttl: chrono::Duration,
    // Serializes read-modify-write cycles on the namespace files.
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: chrono::Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            lock: Mutex::new(()),
        }
    }

    fn path(&self, namespace: &str) -> PathBuf {
        let file = crate::utils::sanitize_filename(&namespace.replace('/', "."));
        self.dir.join(format!("{file}.json"))
    }

    async fn read(&self, namespace: &str) -> Namespace {
        let path = self.path(namespace);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                debug!("[CACHE] Ignoring unreadable cache file {:?}: {}", path, e);
                Namespace::new()
            }),
            Err(_) => Namespace::new(),
        }
    }
}

#[async_trait::async_trait]
impl CacheStore for FileStore {
    async fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let _guard = self.lock.lock().await;
        let entries = self.read(namespace).await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.value.clone())
    }

    async fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read(namespace).await;

        let now = Utc::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );

        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec(&entries)?;
        tokio::fs::write(self.path(namespace), bytes).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let ttl = chrono::Duration::hours(1);

        let store = FileStore::new(dir.path(), ttl);
        store.set("mangapill/mangas", "alpha", json!([1, 2])).await.unwrap();

        let reopened = FileStore::new(dir.path(), ttl);
        assert_eq!(reopened.get("mangapill/mangas", "alpha").await, Some(json!([1, 2])));
        assert_eq!(reopened.get("mangapill/mangas", "beta").await, None);
        assert_eq!(reopened.get("mangapill/chapters", "alpha").await, None);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), chrono::Duration::seconds(-1));
        store.set("ns", "key", json!("value")).await.unwrap();
        assert_eq!(store.get("ns", "key").await, None);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("cache"), chrono::Duration::hours(1));
        store.set("ns", "key", json!(true)).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.get("ns", "key").await, None);
        // Clearing an absent directory is fine.
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store.set("ns", "k", json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("ns", "k").await, Some(json!({"a": 1})));
        store.clear().await.unwrap();
        assert_eq!(store.get("ns", "k").await, None);
    }
}
