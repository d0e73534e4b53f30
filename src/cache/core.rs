//! Primitive cache operations with JSON serialization
//!
//! Every method here swallows store and serialization failures: reads
//! degrade to `None`, writes and deletes to `false`. Callers treat `None`
//! as "absent" whether the key is missing or its payload is corrupt.

use crate::cache::store::KeyValueStore;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Read/write/delete operations against the injected store
#[derive(Clone)]
pub struct CacheCore {
    store: Arc<dyn KeyValueStore>,
}

impl CacheCore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Read and deserialize a value
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        decode(key, &raw)
    }

    /// Read the serialized form of a value
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Serialize and write a value with expiration
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.set_raw(key, &json, ttl).await,
            Err(e) => {
                warn!("Failed to serialize value for {}: {}", key, e);
                false
            }
        }
    }

    /// Write an already-serialized value
    pub async fn set_raw(&self, key: &str, json: &str, ttl: Duration) -> bool {
        match self.store.set(key, json, ttl).await {
            Ok(()) => {
                debug!("Cached {} ({} bytes, ttl {:?})", key, json.len(), ttl);
                true
            }
            Err(e) => {
                warn!("Cache write failed for {}: {}", key, e);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.delete_many(&[key.to_string()]).await
    }

    /// Delete several keys in one store call
    pub async fn delete_many(&self, keys: &[String]) -> bool {
        if keys.is_empty() {
            return true;
        }

        match self.store.delete(keys).await {
            Ok(count) => {
                debug!("Deleted {} of {} keys", count, keys.len());
                true
            }
            Err(e) => {
                warn!("Cache delete failed for {:?}: {}", keys, e);
                false
            }
        }
    }

    /// Delete every key matching `pattern`. No matches counts as success.
    pub async fn delete_by_pattern(&self, pattern: &str) -> bool {
        let keys = match self.store.keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Key scan failed for pattern {}: {}", pattern, e);
                return false;
            }
        };

        if keys.is_empty() {
            debug!("No keys matched pattern {}", pattern);
            return true;
        }

        self.delete_many(&keys).await
    }

    /// Enumerate keys matching `pattern`; `None` if the scan failed
    pub async fn scan(&self, pattern: &str) -> Option<Vec<String>> {
        match self.store.keys(pattern).await {
            Ok(keys) => Some(keys),
            Err(e) => {
                warn!("Key scan failed for pattern {}: {}", pattern, e);
                None
            }
        }
    }

    /// Whether a value exists. `None` if the store could not answer.
    pub async fn exists(&self, key: &str) -> Option<bool> {
        match self.store.exists(key).await {
            Ok(exists) => Some(exists),
            Err(e) => {
                warn!("Existence check failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Remaining lifetime of `key`. `None` if absent or unknown.
    pub async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        match self.store.ttl(key).await {
            Ok(ttl) => ttl,
            Err(e) => {
                warn!("TTL lookup failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Read-through wrapper
    ///
    /// Returns the cached value when present, otherwise calls `fetch`,
    /// caches its result and returns it. A failing store never prevents
    /// the fetched value from reaching the caller; only errors from
    /// `fetch` itself are returned.
    pub async fn with_cache<T, F, Fut, E>(&self, key: &str, fetch: F, ttl: Duration) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key).await {
            debug!("Cache hit: {}", key);
            return Ok(value);
        }

        debug!("Cache miss: {}", key);
        let value = fetch().await?;

        if !self.set(key, &value, ttl).await {
            debug!("Returning uncached value for {}", key);
        }

        Ok(value)
    }
}

/// Deserialize a stored payload, treating corrupt data as a miss
pub(crate) fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding undecodable cache value for {}: {}", key, e);
            None
        }
    }
}
