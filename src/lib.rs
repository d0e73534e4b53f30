//! # Ouroboros Cache (ouroboros-cache)
//!
//! A tag-indexed caching layer for Rust services backed by a shared
//! key-value store such as Redis.
//!
//! ## Features
//!
//! - Read-through caching with per-entry metadata (hits, misses, size, age)
//! - Stale-while-revalidate reads with bounded background refresh
//! - Write-through and write-behind writes against a system of record
//! - Tag-based group invalidation
//! - Batched cache warmup
//! - Aggregated statistics with orphan reconciliation
//! - Pluggable stores: in-process [`MemoryStore`] or Redis (`redis` feature)
//!
//! ## Read-through
//!
//! ```no_run
//! use ouroboros_cache::{CacheConfig, CacheOptions, CacheService, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheService::new(Arc::new(MemoryStore::new()), CacheConfig::from_env()?)?;
//!
//!     let title: String = cache
//!         .get_with_advanced_cache(
//!             "paper:17",
//!             || async { Ok::<_, anyhow::Error>("Attention revisited".to_string()) },
//!             CacheOptions::simple().tag("papers"),
//!         )
//!         .await?;
//!     println!("{}", title);
//!     Ok(())
//! }
//! ```
//!
//! ## Write-through and invalidation
//!
//! ```no_run
//! use ouroboros_cache::{CacheConfig, CacheOptions, CacheService, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheService::new(Arc::new(MemoryStore::new()), CacheConfig::default())?;
//!
//!     let cached = cache
//!         .set_with_write_through(
//!             "user:1",
//!             "Ada".to_string(),
//!             |name| async move {
//!                 // persist `name` to the database here
//!                 Ok::<_, anyhow::Error>(name.len())
//!             },
//!             CacheOptions::simple().tag("users"),
//!         )
//!         .await?;
//!     println!("cached: {}", cached);
//!
//!     cache.invalidate_by_tags(&["users".to_string()]).await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
#[cfg(feature = "redis")]
pub use cache::{RedisConfig, RedisStore};
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheCore, CacheKey, CacheKeyBuilder, CacheMetadata,
    CacheOptions, CacheService, CacheStats, CacheStrategy, InvalidationEvent,
    InvalidationOutcome, InvalidationReason, KeyValueStore, MemoryStore, MetadataTracker,
    TagIndex, WarmupEntry, WarmupReport,
};
pub use error::{CacheError, Result};
