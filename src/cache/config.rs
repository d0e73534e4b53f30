//! Configuration for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the cache service
///
/// Defaults:
/// - TTL: 1 hour, with a 5 minute stale window for stale-while-revalidate
/// - Warmup runs in batches of 5 keys
/// - Tag key-sets live for 24 hours and are pruned lazily
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a call does not supply its own
    pub default_ttl: Duration,

    /// How long past its TTL an entry may still be served while it is
    /// refreshed in the background
    pub stale_window: Duration,

    /// TTL jitter factor (0.0 - 1.0)
    /// Spreads expiry of entries written together
    pub ttl_jitter: f64,

    /// TTL of `tags:<tag>` key-sets
    pub tag_ttl: Duration,

    /// Number of keys fetched concurrently per warmup batch
    pub warmup_batch_size: usize,

    /// Upper bound on background refreshes running at once
    pub max_concurrent_refreshes: usize,

    /// Deduplicate concurrent misses on the same key
    pub enable_single_flight: bool,

    /// Drop metadata records whose data has expired while aggregating stats
    pub reconcile_orphans: bool,

    /// Extra attempts for a failed write-behind database write
    pub write_behind_max_retries: u32,

    /// Delay between write-behind attempts
    pub write_behind_retry_delay: Duration,

    /// Interval for the in-memory store's expiry sweep
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            stale_window: Duration::from_secs(300),
            ttl_jitter: 0.0,
            tag_ttl: Duration::from_secs(24 * 3600),
            warmup_batch_size: 5,
            max_concurrent_refreshes: 32,
            enable_single_flight: true,
            reconcile_orphans: true,
            write_behind_max_retries: 2,
            write_behind_retry_delay: Duration::from_millis(100),
            // Sweep every 5 minutes
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Load configuration from `CACHE_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// Unset variables keep their defaults.
    ///
    /// | Variable | Unit |
    /// |---|---|
    /// | `CACHE_DEFAULT_TTL_SECS` | seconds |
    /// | `CACHE_STALE_WINDOW_SECS` | seconds |
    /// | `CACHE_TTL_JITTER` | fraction |
    /// | `CACHE_TAG_TTL_SECS` | seconds |
    /// | `CACHE_WARMUP_BATCH_SIZE` | count |
    /// | `CACHE_MAX_CONCURRENT_REFRESHES` | count |
    /// | `CACHE_SINGLE_FLIGHT` | bool |
    /// | `CACHE_RECONCILE_ORPHANS` | bool |
    /// | `CACHE_WRITE_BEHIND_RETRIES` | count |
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            default_ttl: env_parse::<u64>("CACHE_DEFAULT_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_ttl),
            stale_window: env_parse::<u64>("CACHE_STALE_WINDOW_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_window),
            ttl_jitter: env_parse::<f64>("CACHE_TTL_JITTER")?.unwrap_or(defaults.ttl_jitter),
            tag_ttl: env_parse::<u64>("CACHE_TAG_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.tag_ttl),
            warmup_batch_size: env_parse::<usize>("CACHE_WARMUP_BATCH_SIZE")?
                .unwrap_or(defaults.warmup_batch_size),
            max_concurrent_refreshes: env_parse::<usize>("CACHE_MAX_CONCURRENT_REFRESHES")?
                .unwrap_or(defaults.max_concurrent_refreshes),
            enable_single_flight: env_parse::<bool>("CACHE_SINGLE_FLIGHT")?
                .unwrap_or(defaults.enable_single_flight),
            reconcile_orphans: env_parse::<bool>("CACHE_RECONCILE_ORPHANS")?
                .unwrap_or(defaults.reconcile_orphans),
            write_behind_max_retries: env_parse::<u32>("CACHE_WRITE_BEHIND_RETRIES")?
                .unwrap_or(defaults.write_behind_max_retries),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(CacheError::ConfigError(
                "default_ttl must be greater than 0".to_string(),
            ));
        }

        if self.tag_ttl.is_zero() {
            return Err(CacheError::ConfigError(
                "tag_ttl must be greater than 0".to_string(),
            ));
        }

        if self.warmup_batch_size == 0 {
            return Err(CacheError::ConfigError(
                "warmup_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_refreshes == 0 {
            return Err(CacheError::ConfigError(
                "max_concurrent_refreshes must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::ConfigError(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply the configured jitter to a TTL
    ///
    /// The result stays within `ttl * (1 ± ttl_jitter)` at any scale and
    /// never drops below one millisecond.
    pub fn ttl_with_jitter(&self, ttl: Duration) -> Duration {
        if self.ttl_jitter == 0.0 {
            return ttl;
        }

        let base_secs = ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(0.001);

        Duration::from_secs_f64(final_secs)
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CacheError::ConfigError(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    stale_window: Option<Duration>,
    ttl_jitter: Option<f64>,
    tag_ttl: Option<Duration>,
    warmup_batch_size: Option<usize>,
    max_concurrent_refreshes: Option<usize>,
    enable_single_flight: Option<bool>,
    reconcile_orphans: Option<bool>,
    write_behind_max_retries: Option<u32>,
    write_behind_retry_delay: Option<Duration>,
    cleanup_interval: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set the stale-while-revalidate window
    pub fn stale_window(mut self, window: Duration) -> Self {
        self.stale_window = Some(window);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set TTL of tag key-sets
    pub fn tag_ttl(mut self, ttl: Duration) -> Self {
        self.tag_ttl = Some(ttl);
        self
    }

    /// Set warmup batch size
    pub fn warmup_batch_size(mut self, size: usize) -> Self {
        self.warmup_batch_size = Some(size);
        self
    }

    /// Set the cap on concurrent background refreshes
    pub fn max_concurrent_refreshes(mut self, max: usize) -> Self {
        self.max_concurrent_refreshes = Some(max);
        self
    }

    /// Enable or disable single-flight deduplication
    pub fn enable_single_flight(mut self, enable: bool) -> Self {
        self.enable_single_flight = Some(enable);
        self
    }

    /// Enable or disable orphan reconciliation during stats aggregation
    pub fn reconcile_orphans(mut self, enable: bool) -> Self {
        self.reconcile_orphans = Some(enable);
        self
    }

    /// Set the number of write-behind retries
    pub fn write_behind_max_retries(mut self, retries: u32) -> Self {
        self.write_behind_max_retries = Some(retries);
        self
    }

    /// Set the delay between write-behind retries
    pub fn write_behind_retry_delay(mut self, delay: Duration) -> Self {
        self.write_behind_retry_delay = Some(delay);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            stale_window: self.stale_window.unwrap_or(defaults.stale_window),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            tag_ttl: self.tag_ttl.unwrap_or(defaults.tag_ttl),
            warmup_batch_size: self
                .warmup_batch_size
                .unwrap_or(defaults.warmup_batch_size),
            max_concurrent_refreshes: self
                .max_concurrent_refreshes
                .unwrap_or(defaults.max_concurrent_refreshes),
            enable_single_flight: self
                .enable_single_flight
                .unwrap_or(defaults.enable_single_flight),
            reconcile_orphans: self.reconcile_orphans.unwrap_or(defaults.reconcile_orphans),
            write_behind_max_retries: self
                .write_behind_max_retries
                .unwrap_or(defaults.write_behind_max_retries),
            write_behind_retry_delay: self
                .write_behind_retry_delay
                .unwrap_or(defaults.write_behind_retry_delay),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Short-lived data such as dashboards and search results
    pub fn realtime() -> Self {
        Self {
            default_ttl: Duration::from_secs(300), // 5 minutes
            stale_window: Duration::from_secs(60),
            ttl_jitter: 0.15,
            ..Default::default()
        }
    }

    /// Content refreshed about once a day
    pub fn daily() -> Self {
        Self {
            default_ttl: Duration::from_secs(23 * 3600), // 23 hours
            stale_window: Duration::from_secs(3600),
            ttl_jitter: 0.10,
            tag_ttl: Duration::from_secs(48 * 3600),
            ..Default::default()
        }
    }

    /// Reference data that rarely changes
    pub fn static_content() -> Self {
        Self {
            default_ttl: Duration::from_secs(48 * 3600), // 48 hours
            stale_window: Duration::from_secs(6 * 3600),
            ttl_jitter: 0.05,
            tag_ttl: Duration::from_secs(7 * 24 * 3600),
            ..Default::default()
        }
    }
}
