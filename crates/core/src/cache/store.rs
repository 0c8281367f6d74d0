//! Persistent key → JSON store abstraction.
//!
//! The entity service only needs independent get/set per key plus prefix
//! listing. `CacheDb` backs it with SQLite; `MemoryStore` keeps everything
//! in a map for tests and ephemeral runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::connection::CacheDb;
use crate::Error;

/// Key → JSON blob store consumed by the entity service.
#[async_trait::async_trait]
pub trait PersistentStore: Send + Sync {
    /// Read the blob stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Write (insert or replace) the blob stored under `key`.
    async fn set(&self, key: &str, value_json: &str) -> Result<(), Error>;

    /// Remove the blob stored under `key`. Returns whether anything was removed.
    async fn remove(&self, key: &str) -> Result<bool, Error>;

    /// List keys starting with `prefix`, in key order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, Error>;

    /// Count keys starting with `prefix`.
    async fn count(&self, prefix: &str) -> Result<u64, Error>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    async fn purge(&self, prefix: &str) -> Result<u64, Error>;
}

#[async_trait::async_trait]
impl PersistentStore for CacheDb {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.get_entry(key).await
    }

    async fn set(&self, key: &str, value_json: &str) -> Result<(), Error> {
        self.put_entry(key, value_json).await
    }

    async fn remove(&self, key: &str) -> Result<bool, Error> {
        self.delete_entry(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, Error> {
        self.entry_keys(prefix).await
    }

    async fn count(&self, prefix: &str) -> Result<u64, Error> {
        self.count_entries(prefix).await
    }

    async fn purge(&self, prefix: &str) -> Result<u64, Error> {
        self.purge_entries(prefix).await
    }
}

/// In-memory store with the same semantics as `CacheDb`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    map: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.map.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.map.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value_json: &str) -> Result<(), Error> {
        self.map.write().await.insert(key.to_string(), value_json.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, Error> {
        Ok(self.map.write().await.remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let map = self.map.read().await;
        Ok(map.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    async fn count(&self, prefix: &str) -> Result<u64, Error> {
        let map = self.map.read().await;
        Ok(map.keys().filter(|k| k.starts_with(prefix)).count() as u64)
    }

    async fn purge(&self, prefix: &str) -> Result<u64, Error> {
        let mut map = self.map.write().await;
        let before = map.len();
        map.retain(|k, _| !k.starts_with(prefix));
        Ok((before - map.len()) as u64)
    }
}
