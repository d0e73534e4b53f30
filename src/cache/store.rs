//! Key-value store abstraction and the in-memory backend
//!
//! The cache layers never talk to a concrete backend. They hold an
//! `Arc<dyn KeyValueStore>` whose contract mirrors the four Redis commands
//! the cache needs: `GET`, `SET key value PX ttl`, `DEL key...` and
//! `KEYS pattern`.

use crate::error::{CacheError, Result};
use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Minimum contract a backing store must satisfy
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a raw value. `Ok(None)` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a raw value that expires after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> Result<usize>;

    /// Enumerate keys matching a glob pattern (`*`, `?`, `[...]`)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Whether a live value exists for `key`
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remaining time to live of `key`, `None` if absent or unknown
    async fn ttl(&self, _key: &str) -> Result<Option<Duration>> {
        Ok(None)
    }
}

/// Compile a store key pattern
pub fn compile_pattern(pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| CacheError::PatternError {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process store with lazy TTL expiry
///
/// Expired values are invisible to reads immediately and are physically
/// removed by [`MemoryStore::purge_expired`] or the background sweep.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|v| !v.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove every key
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        info!("Cleared {} keys from memory store", count);
    }

    /// Physically remove expired values, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, v| !v.is_expired(now));
        let removed = before - entries.len();

        if removed > 0 {
            debug!("Purged {} expired keys", removed);
        }
        removed
    }

    /// Spawn the periodic expiry sweep
    pub fn spawn_auto_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(run_auto_cleanup(Arc::clone(self), interval))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|v| !v.is_expired(Instant::now()))
            .map(|v| v.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(CacheError::StoreError(format!(
                "invalid expire time in SET {}",
                key
            )));
        }

        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut removed = 0;

        for key in keys {
            if let Some(v) = entries.remove(key) {
                if !v.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|v| !v.is_expired(now))
            .map(|v| v.expires_at - now))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = compile_pattern(pattern)?;
        let now = Instant::now();
        let entries = self.entries.read().await;

        Ok(entries
            .iter()
            .filter(|(k, v)| !v.is_expired(now) && matcher.is_match(k.as_str()))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Background task for automatic expiry sweeps
pub async fn run_auto_cleanup(store: Arc<MemoryStore>, interval: Duration) {
    info!("Starting memory store cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;
        store.purge_expired().await;
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store
            .set("user:1", "\"alice\"", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            store.get("user:1").await.unwrap(),
            Some("\"alice\"".to_string())
        );
        assert!(store.exists("user:1").await.unwrap());

        let removed = store
            .delete(&["user:1".to_string(), "user:2".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get("user:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.keys("*").await.unwrap().is_empty());
        assert_eq!(store.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn test_remaining_ttl() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_secs(10)).await.unwrap();

        let remaining = store.ttl("k").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining > Duration::from_secs(9));
        assert_eq!(store.ttl("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let store = MemoryStore::new();
        let result = store.set("k", "v", Duration::ZERO).await;
        assert!(matches!(result, Err(CacheError::StoreError(_))));
    }

    #[tokio::test]
    async fn test_keys_pattern() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set("project:1", "1", ttl).await.unwrap();
        store.set("project:2", "2", ttl).await.unwrap();
        store.set("metadata:project:1", "{}", ttl).await.unwrap();
        store.set("team:1", "1", ttl).await.unwrap();

        let mut keys = store.keys("project:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["project:1", "project:2"]);

        let keys = store.keys("metadata:*").await.unwrap();
        assert_eq!(keys, vec!["metadata:project:1"]);

        assert!(matches!(
            store.keys("project:[").await,
            Err(CacheError::PatternError { .. })
        ));
    }

    #[tokio::test]
    async fn test_auto_cleanup() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("short", "v", Duration::from_millis(20))
            .await
            .unwrap();
        store
            .set("long", "v", Duration::from_secs(60))
            .await
            .unwrap();

        let handle = store.spawn_auto_cleanup(Duration::from_millis(30));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        let entries = store.entries.read().await;
        assert!(!entries.contains_key("short"));
        assert!(entries.contains_key("long"));
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryStore::new();
        store.set("a", "1", Duration::from_secs(60)).await.unwrap();
        store.set("b", "2", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.len().await, 2);

        store.clear().await;
        assert!(store.is_empty().await);
    }
}
