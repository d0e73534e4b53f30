//! Per-key metadata stored beside cached values
//!
//! Records live under `metadata:<key>` and expire together with the data
//! they describe: every write carries the data's expiry forward, so a
//! record never outlives its entry by more than a sweep interval.

use crate::cache::core::{decode, CacheCore};
use crate::cache::keys::{data_key_from_metadata, metadata_key, METADATA_PREFIX};
use crate::cache::types::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Metadata associated with a cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    /// When the entry was first written
    pub created_at: DateTime<Utc>,

    /// When the value was last written (freshness reference)
    pub updated_at: DateTime<Utc>,

    /// Last read or write
    pub last_accessed_at: DateTime<Utc>,

    /// End of the freshness horizon; equals `expires_at` without a stale window
    pub fresh_until: DateTime<Utc>,

    /// When the data key expires in the store
    pub expires_at: DateTime<Utc>,

    /// Incremented on every hit and every write
    pub access_count: u64,

    pub hits: u64,

    pub misses: u64,

    /// `hits / (hits + misses)`, 0 before any lookup
    pub hit_rate: f64,

    /// Serialized size of the value in bytes
    pub size: usize,
}

impl CacheMetadata {
    fn new(size: usize, fresh_for: Duration, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            fresh_until: now + to_chrono(fresh_for),
            expires_at: now + to_chrono(ttl),
            access_count: 1,
            hits: 0,
            misses: 0,
            hit_rate: 0.0,
            size,
        }
    }

    fn recompute_hit_rate(&mut self) {
        let lookups = self.hits + self.misses;
        self.hit_rate = if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        };
    }

    /// Time since the value was last written
    pub fn age(&self) -> Duration {
        (Utc::now() - self.updated_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// Time until the data key expires, `None` once it has
    pub fn time_until_expiration(&self) -> Option<Duration> {
        (self.expires_at - Utc::now()).to_std().ok()
    }

    /// Past its freshness horizon but not yet expired
    pub fn is_stale(&self) -> bool {
        let now = Utc::now();
        now >= self.fresh_until && now < self.expires_at
    }

    /// Past the end of the stale window
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::seconds(3600))
}

/// Reads and updates metadata records
#[derive(Clone)]
pub struct MetadataTracker {
    core: CacheCore,
}

impl MetadataTracker {
    pub fn new(core: CacheCore) -> Self {
        Self { core }
    }

    pub async fn get(&self, key: &str) -> Option<CacheMetadata> {
        self.core.get(&metadata_key(key)).await
    }

    /// Record a read hit
    ///
    /// Creates the record if it is missing (written with `fallback_ttl`),
    /// otherwise bumps the counters and keeps `created_at`.
    pub async fn touch(&self, key: &str, size_bytes: usize, fallback_ttl: Duration) -> Option<CacheMetadata> {
        let existing = self.get(key).await;
        self.touch_loaded(key, existing, size_bytes, fallback_ttl).await
    }

    /// [`touch`](Self::touch) for a record the caller already read
    pub async fn touch_loaded(
        &self,
        key: &str,
        existing: Option<CacheMetadata>,
        size_bytes: usize,
        fallback_ttl: Duration,
    ) -> Option<CacheMetadata> {
        let now = Utc::now();
        let (metadata, ttl) = match existing {
            Some(mut existing) => {
                existing.access_count += 1;
                existing.hits += 1;
                existing.last_accessed_at = now;
                existing.size = size_bytes;
                existing.recompute_hit_rate();
                let ttl = existing
                    .time_until_expiration()
                    .unwrap_or(Duration::ZERO)
                    .max(Duration::from_millis(1));
                (existing, ttl)
            }
            None => {
                let mut created = CacheMetadata::new(size_bytes, fallback_ttl, fallback_ttl);
                created.hits = 1;
                created.recompute_hit_rate();
                (created, fallback_ttl)
            }
        };

        if self.core.set(&metadata_key(key), &metadata, ttl).await {
            Some(metadata)
        } else {
            warn!("Failed to record hit metadata for {}", key);
            None
        }
    }

    /// Record a write of `key` that is fresh for `fresh_for` and expires
    /// after `ttl`
    ///
    /// `after_miss` counts the lookup miss that led to this write.
    pub async fn record_write(
        &self,
        key: &str,
        size_bytes: usize,
        fresh_for: Duration,
        ttl: Duration,
        after_miss: bool,
    ) -> bool {
        let now = Utc::now();
        let mut metadata = match self.get(key).await {
            Some(mut existing) => {
                existing.access_count += 1;
                existing.updated_at = now;
                existing.last_accessed_at = now;
                existing.fresh_until = now + to_chrono(fresh_for);
                existing.expires_at = now + to_chrono(ttl);
                existing.size = size_bytes;
                existing
            }
            None => CacheMetadata::new(size_bytes, fresh_for, ttl),
        };

        if after_miss {
            metadata.misses += 1;
        }
        metadata.recompute_hit_rate();

        let written = self.core.set(&metadata_key(key), &metadata, ttl).await;
        if !written {
            warn!("Failed to record write metadata for {}", key);
        }
        written
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.core.delete(&metadata_key(key)).await
    }

    /// Every metadata record, keyed by data key. `None` if the scan failed.
    pub async fn all(&self) -> Option<Vec<(CacheKey, CacheMetadata)>> {
        let pattern = format!("{}*", METADATA_PREFIX);
        let store_keys = self.core.scan(&pattern).await?;
        let mut records = Vec::with_capacity(store_keys.len());

        for store_key in store_keys {
            let Some(data_key) = data_key_from_metadata(&store_key) else {
                continue;
            };
            // Records can expire between the scan and the read
            if let Some(raw) = self.core.get_raw(&store_key).await {
                if let Some(metadata) = decode::<CacheMetadata>(&store_key, &raw) {
                    records.push((data_key.to_string(), metadata));
                }
            }
        }

        debug!("Loaded {} metadata records", records.len());
        Some(records)
    }
}
