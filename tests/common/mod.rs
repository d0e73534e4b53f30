//! Shared helpers for integration tests

use async_trait::async_trait;
use ouroboros_cache::{CacheError, KeyValueStore, MemoryStore, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Memory store that can be switched off to simulate an outage
#[derive(Default)]
pub struct OutageStore {
    inner: MemoryStore,
    down: AtomicBool,
    reads_down: AtomicBool,
    calls: AtomicUsize,
}

impl OutageStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail only `GET`, as a replica timing out on reads would
    pub fn set_reads_down(&self, down: bool) {
        self.reads_down.store(down, Ordering::SeqCst);
    }

    /// Store commands received, including rejected ones
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::StoreError("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for OutageStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        if self.reads_down.load(Ordering::SeqCst) {
            return Err(CacheError::StoreError("read timed out".to_string()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        self.check()?;
        self.inner.delete(keys).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.keys(pattern).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.check()?;
        self.inner.ttl(key).await
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
