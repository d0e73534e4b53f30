//! # Tag-Indexed Cache Layer
//!
//! A caching layer over a shared key-value store that adds per-entry
//! metadata, tag-based group invalidation and several read/write
//! strategies.
//!
//! ## Features
//!
//! - **TTL-Based Expiration**: every key expires in the store, with optional jitter
//! - **Stale-While-Revalidate**: serve an expired value for a grace window while refreshing it
//! - **Write-Through / Write-Behind**: order cache and database writes per call
//! - **Tag Invalidation**: drop every entry registered under a tag in one call
//! - **Fail-Open**: store outages turn into cache misses, never caller errors
//! - **Single-Flight**: concurrent misses on one key share a single fetch
//!
//! ## Store layout
//!
//! | Key               | Value                                  |
//! |-------------------|----------------------------------------|
//! | `<key>`           | JSON-serialized value                  |
//! | `metadata:<key>`  | JSON [`CacheMetadata`] for the entry   |
//! | `tags:<tag>`      | JSON array of keys carrying the tag    |
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_cache::cache::{CacheConfig, CacheOptions, CacheService, MemoryStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::builder()
//!     .default_ttl(Duration::from_secs(600))
//!     .stale_window(Duration::from_secs(60))
//!     .build();
//!
//! let cache = CacheService::new(Arc::new(MemoryStore::new()), config)?;
//!
//! let count: u64 = cache
//!     .get_with_advanced_cache(
//!         "team:7:members",
//!         || async { Ok::<_, std::io::Error>(12) },
//!         CacheOptions::simple().tag("teams"),
//!     )
//!     .await?;
//!
//! println!("{}", cache.get_cache_stats().await);
//! # let _ = count;
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod config;
pub mod core;
pub mod invalidation;
pub mod keys;
pub mod metadata;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod service;
pub mod single_flight;
pub mod store;
pub mod tags;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use self::core::CacheCore;
pub use invalidation::{InvalidationEvent, InvalidationOutcome, InvalidationReason};
pub use keys::{metadata_key, tag_key, CacheKeyBuilder, METADATA_PREFIX, TAG_PREFIX};
pub use metadata::{CacheMetadata, MetadataTracker};
#[cfg(feature = "redis")]
pub use redis_store::{RedisConfig, RedisStore};
pub use service::{CacheService, WarmupEntry};
pub use store::{KeyValueStore, MemoryStore};
pub use tags::TagIndex;
pub use types::{CacheKey, CacheOptions, CacheStats, CacheStrategy, WarmupReport};
