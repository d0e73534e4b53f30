//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Cache key type
pub type CacheKey = String;

/// Read/write policy applied by [`CacheService`](crate::cache::CacheService)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Plain read-through with TTL
    #[default]
    Simple,

    /// Serve expired data for a grace window while refreshing in the background
    StaleWhileRevalidate,

    /// Database write gates the cache write
    WriteThrough,

    /// Cache write first, database write in the background
    WriteBehind,
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStrategy::Simple => write!(f, "simple"),
            CacheStrategy::StaleWhileRevalidate => write!(f, "stale-while-revalidate"),
            CacheStrategy::WriteThrough => write!(f, "write-through"),
            CacheStrategy::WriteBehind => write!(f, "write-behind"),
        }
    }
}

/// Per-call cache options
///
/// Unset TTL and stale window fall back to the service configuration.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub strategy: CacheStrategy,
    pub ttl: Option<Duration>,
    pub stale_window: Option<Duration>,
    pub tags: Vec<String>,
}

impl CacheOptions {
    pub fn new(strategy: CacheStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn simple() -> Self {
        Self::new(CacheStrategy::Simple)
    }

    pub fn stale_while_revalidate() -> Self {
        Self::new(CacheStrategy::StaleWhileRevalidate)
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn stale_window(mut self, window: Duration) -> Self {
        self.stale_window = Some(window);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Aggregated cache statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// Number of live entries with metadata
    pub total_entries: usize,

    /// Sum of serialized entry sizes in bytes
    pub total_size: usize,

    /// Mean of per-entry hit rates, in [0, 1]
    pub hit_rate: f64,

    /// Mean access count per entry
    pub avg_access_count: f64,

    /// Number of keys per tag
    pub tag_stats: BTreeMap<String, usize>,

    /// Lookups served from cache since the service started
    pub hits: u64,

    /// Lookups that fell through to the fetch function
    pub misses: u64,

    /// Orphaned metadata records removed during this aggregation
    pub orphans_pruned: usize,

    /// Write-behind database writes that failed after all retries
    pub write_behind_failures: u64,

    /// Background refreshes that were skipped because one was already
    /// running for the key or the refresh cap was reached
    pub refreshes_skipped: u64,
}

impl CacheStats {
    /// Hit rate over all lookups handled by this service instance, in [0, 1]
    pub fn overall_hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ entries: {}, size: {} bytes, hit_rate: {:.2}, hits: {}, misses: {}, tags: {} }}",
            self.total_entries,
            self.total_size,
            self.hit_rate,
            self.hits,
            self.misses,
            self.tag_stats.len()
        )
    }
}

/// Outcome of a warmup run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmupReport {
    /// Keys fetched and written
    pub warmed: Vec<CacheKey>,

    /// Keys that already had a cached value
    pub skipped: Vec<CacheKey>,

    /// Keys whose fetch or write failed
    pub failed: Vec<CacheKey>,
}
