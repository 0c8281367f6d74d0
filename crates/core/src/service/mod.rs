//! Cache-aside entity service.
//!
//! Reads go to the persistent store first. Misses and forced refreshes call
//! the configured source, write the result back, and fall back to the last
//! cached value (however old) when the source fails. A fetch failure never
//! escapes `get` or `get_all`; only store failures do.

mod entry;
mod flight;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;

use crate::cache::PersistentStore;
use crate::cancel::CancelToken;
use crate::config::AppConfig;
use crate::model::{Entity, Record};
use crate::Error;

pub use entry::CacheEntry;
use flight::KeyedLocks;

/// Outcome of a service read.
#[derive(Debug, Clone, PartialEq)]
pub enum Served<T> {
    /// Fetched from the source during this call (or by a concurrent call this one waited on).
    Fresh(T),
    /// Served from the cache without contacting the source.
    Cached(T),
    /// The source failed; this is the last cached value.
    Stale(T),
    /// The source failed and nothing was cached.
    NotFound,
}

impl<T> Served<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Served::Fresh(v) | Served::Cached(v) | Served::Stale(v) => Some(v),
            Served::NotFound => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Served::Fresh(v) | Served::Cached(v) | Served::Stale(v) => Some(v),
            Served::NotFound => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Served::Stale(_))
    }

    /// Short label for logs and tool output.
    pub fn source(&self) -> &'static str {
        match self {
            Served::Fresh(_) => "fresh",
            Served::Cached(_) => "cached",
            Served::Stale(_) => "stale",
            Served::NotFound => "not_found",
        }
    }
}

/// Fetches a single entity from upstream.
#[async_trait::async_trait]
pub trait EntitySource<T>: Send + Sync {
    async fn fetch_one(&self, key: &str, cancel: &CancelToken) -> Result<T, Error>;
}

/// Fetches the complete collection from upstream.
#[async_trait::async_trait]
pub trait CollectionSource<T>: Send + Sync {
    async fn fetch_all(&self, cancel: &CancelToken) -> Result<Vec<T>, Error>;
}

/// Cache layout and freshness settings.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Prefix shared by every key this service writes.
    pub namespace: String,
    pub collection_name: String,
    pub ttl: Duration,
}

impl ServiceOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self { namespace: "record".into(), collection_name: config.collection_name.clone(), ttl: config.cache_ttl() }
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self { namespace: "record".into(), collection_name: "all".into(), ttl: Duration::from_secs(86_400) }
    }
}

/// Counts reported by [`EntityService::refresh_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub checked: usize,
    pub refreshed: usize,
    pub stale: usize,
    pub collection_refreshed: bool,
}

pub struct EntityService<T: Entity> {
    store: Arc<dyn PersistentStore>,
    entity_source: Arc<dyn EntitySource<T>>,
    collection_source: Option<Arc<dyn CollectionSource<T>>>,
    options: ServiceOptions,
    /// Held for the duration of a source fetch, per cache key.
    flights: KeyedLocks,
    /// Held only while entries are written, so collection members and the collection stay in step.
    writes: KeyedLocks,
    cancel: CancelToken,
}

impl<T: Entity> EntityService<T> {
    pub fn new(store: Arc<dyn PersistentStore>, entity_source: Arc<dyn EntitySource<T>>, options: ServiceOptions) -> Self {
        Self {
            store,
            entity_source,
            collection_source: None,
            options,
            flights: KeyedLocks::default(),
            writes: KeyedLocks::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_collection_source(mut self, source: Arc<dyn CollectionSource<T>>) -> Self {
        self.collection_source = Some(source);
        self
    }

    /// Token handed to every source call. Cancelling it aborts in-flight fetches.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    fn entity_key(&self, key: &str) -> String {
        format!("{}:entity:{}", self.options.namespace, key)
    }

    fn entity_prefix(&self) -> String {
        format!("{}:entity:", self.options.namespace)
    }

    fn collection_key(&self) -> String {
        format!("{}:collection:{}", self.options.namespace, self.options.collection_name)
    }

    async fn read<V: DeserializeOwned>(&self, cache_key: &str) -> Result<Option<CacheEntry<V>>, Error> {
        match self.store.get(cache_key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write<V: serde::Serialize>(&self, cache_key: &str, entry: &CacheEntry<V>) -> Result<(), Error> {
        let json = serde_json::to_string(entry)?;
        self.store.set(cache_key, &json).await
    }

    async fn fallback<V: DeserializeOwned>(&self, cache_key: &str, err: &Error) -> Result<Served<V>, Error> {
        match self.read::<V>(cache_key).await? {
            Some(entry) => {
                tracing::warn!(
                    key = cache_key,
                    error = %err,
                    stale = true,
                    fetched_at = %entry.fetched_at,
                    "Fetch failed, serving stale cache entry"
                );
                Ok(Served::Stale(entry.value))
            }
            None => {
                tracing::warn!(key = cache_key, error = %err, "Fetch failed with nothing cached");
                Ok(Served::NotFound)
            }
        }
    }

    /// Read one entity.
    ///
    /// Without `force_refresh`, any cached entry is returned as `Cached`, expired or not.
    /// Concurrent misses for the same key share one upstream fetch.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty key or when the store itself fails.
    pub async fn get(&self, key: &str, force_refresh: bool) -> Result<Served<T>, Error> {
        if key.is_empty() {
            return Err(Error::InvalidInput("entity key must not be empty".into()));
        }

        let cache_key = self.entity_key(key);
        if !force_refresh && let Some(entry) = self.read::<T>(&cache_key).await? {
            tracing::debug!(key, "Cache hit");
            return Ok(Served::Cached(entry.value));
        }

        let flight = self.flights.acquire(&cache_key).await;

        if let Some(entry) = self.read::<T>(&cache_key).await? {
            if !force_refresh {
                return Ok(Served::Cached(entry.value));
            }
            if flight.joined() {
                tracing::debug!(key, "Refreshed by a concurrent caller");
                return Ok(Served::Fresh(entry.value));
            }
        }

        match self.entity_source.fetch_one(key, &self.cancel).await {
            Ok(value) => {
                let entry = CacheEntry::new(value, self.options.ttl);
                self.write_entity(&cache_key, &entry).await?;
                flight.complete();
                tracing::debug!(key, "Entity fetched and cached");
                Ok(Served::Fresh(entry.value))
            }
            Err(err) => self.fallback(&cache_key, &err).await,
        }
    }

    /// Write one entity and upsert it into the cached collection (replace by key, else append).
    ///
    /// Nothing is upserted when no collection is cached yet. The collection keeps its own timestamps.
    /// Only the short write lock is taken, never the collection's fetch lock.
    async fn write_entity(&self, cache_key: &str, entry: &CacheEntry<T>) -> Result<(), Error> {
        let collection_key = self.collection_key();
        let _write = self.writes.acquire(&collection_key).await;

        self.write(cache_key, entry).await?;

        let Some(mut collection) = self.read::<Vec<T>>(&collection_key).await? else {
            return Ok(());
        };

        let value = &entry.value;
        match collection.value.iter_mut().find(|item| item.key() == value.key()) {
            Some(existing) => *existing = value.clone(),
            None => collection.value.push(value.clone()),
        }

        self.write(&collection_key, &collection).await
    }

    /// Read the whole collection.
    ///
    /// Without a collection source this only ever returns what is cached (possibly empty).
    ///
    /// # Errors
    ///
    /// Returns an error when the store itself fails.
    pub async fn get_all(&self, force_refresh: bool) -> Result<Served<Vec<T>>, Error> {
        let collection_key = self.collection_key();
        if !force_refresh && let Some(entry) = self.read::<Vec<T>>(&collection_key).await? {
            return Ok(Served::Cached(entry.value));
        }

        let Some(source) = &self.collection_source else {
            tracing::warn!(
                collection = %self.options.collection_name,
                "No collection source configured, serving cached collection only"
            );
            let cached = self.read::<Vec<T>>(&collection_key).await?.map(|e| e.value).unwrap_or_default();
            return Ok(Served::Cached(cached));
        };

        let flight = self.flights.acquire(&collection_key).await;

        if let Some(entry) = self.read::<Vec<T>>(&collection_key).await? {
            if !force_refresh {
                return Ok(Served::Cached(entry.value));
            }
            if flight.joined() {
                return Ok(Served::Fresh(entry.value));
            }
        }

        match source.fetch_all(&self.cancel).await {
            Ok(items) => {
                let entry = CacheEntry::new(items, self.options.ttl);
                {
                    let _write = self.writes.acquire(&collection_key).await;
                    for item in &entry.value {
                        let member = CacheEntry::new(item.clone(), self.options.ttl);
                        self.write(&self.entity_key(item.key()), &member).await?;
                    }
                    self.write(&collection_key, &entry).await?;
                }
                flight.complete();
                tracing::info!(
                    collection = %self.options.collection_name,
                    count = entry.value.len(),
                    "Collection fetched and cached"
                );
                Ok(Served::Fresh(entry.value))
            }
            Err(err) => self.fallback(&collection_key, &err).await,
        }
    }

    /// Filter the cached collection in memory. Never fetches.
    pub async fn get_by_filter<F>(&self, predicate: F) -> Result<Vec<T>, Error>
    where
        F: Fn(&T) -> bool + Send,
    {
        let items = self.read::<Vec<T>>(&self.collection_key()).await?.map(|e| e.value).unwrap_or_default();
        Ok(items.into_iter().filter(|item| predicate(item)).collect())
    }

    pub async fn refresh(&self, key: &str) -> Result<Served<T>, Error> {
        self.get(key, true).await
    }

    pub async fn refresh_all(&self) -> Result<Served<Vec<T>>, Error> {
        self.get_all(true).await
    }

    /// Raw cache entry for `key`, including timestamps.
    pub async fn entry(&self, key: &str) -> Result<Option<CacheEntry<T>>, Error> {
        self.read(&self.entity_key(key)).await
    }

    /// Drop the cached entry for `key`. Returns whether anything was removed.
    pub async fn invalidate(&self, key: &str) -> Result<bool, Error> {
        let removed = self.store.remove(&self.entity_key(key)).await?;
        tracing::debug!(key, removed, "Invalidated entity");
        Ok(removed)
    }

    /// Drop every cached entity whose TTL has passed. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        let now = Utc::now();
        let mut removed = 0;
        for key in self.cached_keys().await? {
            if self.entry(&key).await?.is_some_and(|entry| entry.is_expired_at(now)) && self.invalidate(&key).await? {
                removed += 1;
            }
        }
        tracing::info!(removed, "Purged expired entities");
        Ok(removed)
    }

    /// Drop every cached entity, and the cached collection when `include_collection` is set.
    ///
    /// Returns the number of removed entries.
    pub async fn purge(&self, include_collection: bool) -> Result<u64, Error> {
        let collection_key = self.collection_key();
        let _write = self.writes.acquire(&collection_key).await;

        let mut removed = self.store.purge(&self.entity_prefix()).await?;
        if include_collection && self.store.remove(&collection_key).await? {
            removed += 1;
        }
        tracing::info!(removed, include_collection, "Purged cache");
        Ok(removed)
    }

    /// Number of entries (entities and collection) stored under this service's namespace.
    pub async fn cached_count(&self) -> Result<u64, Error> {
        self.store.count(&format!("{}:", self.options.namespace)).await
    }

    /// Keys of every cached entity.
    pub async fn cached_keys(&self) -> Result<Vec<String>, Error> {
        let prefix = self.entity_prefix();
        let keys = self.store.keys(&prefix).await?;
        Ok(keys.into_iter().filter_map(|k| k.strip_prefix(&prefix).map(str::to_string)).collect())
    }

    /// Re-fetch the collection (when expired or missing) and every expired entity.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` when the service token is cancelled between keys,
    /// or a store error.
    pub async fn refresh_expired(&self) -> Result<RefreshSummary, Error> {
        let mut summary = RefreshSummary::default();
        let now = Utc::now();

        if self.collection_source.is_some() {
            let collection = self.read::<Vec<T>>(&self.collection_key()).await?;
            if collection.is_none_or(|entry| entry.is_expired_at(now)) {
                summary.collection_refreshed = matches!(self.get_all(true).await?, Served::Fresh(_));
            }
        }

        for key in self.cached_keys().await? {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            summary.checked += 1;

            let Some(entry) = self.entry(&key).await? else {
                continue;
            };
            if !entry.is_expired_at(Utc::now()) {
                continue;
            }

            match self.get(&key, true).await? {
                Served::Fresh(_) => summary.refreshed += 1,
                Served::Stale(_) | Served::NotFound => summary.stale += 1,
                Served::Cached(_) => {}
            }
        }

        tracing::info!(
            checked = summary.checked,
            refreshed = summary.refreshed,
            stale = summary.stale,
            collection_refreshed = summary.collection_refreshed,
            "Expired entries refreshed"
        );

        Ok(summary)
    }
}

impl EntityService<Record> {
    /// Cached records listed under `parent`.
    pub async fn get_by_parent(&self, parent: &str, case_insensitive: bool) -> Result<Vec<Record>, Error> {
        self.get_by_filter(|r| r.has_parent(parent, case_insensitive)).await
    }

    /// Cached records carrying `tag`.
    pub async fn get_by_tag(&self, tag: &str, case_insensitive: bool) -> Result<Vec<Record>, Error> {
        self.get_by_filter(|r| r.has_tag(tag, case_insensitive)).await
    }
}
