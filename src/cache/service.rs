//! Strategy layer combining the core, metadata and tag index
//!
//! [`CacheService`] is the entry point callers use. Every path degrades to
//! "do the uncached thing" when the store misbehaves: the only errors a
//! caller sees come from its own fetch or database-write functions.

use crate::cache::background::BackgroundTasks;
use crate::cache::config::CacheConfig;
use crate::cache::core::{decode, CacheCore};
use crate::cache::invalidation::{InvalidationEvent, InvalidationOutcome, InvalidationReason};
use crate::cache::keys::{is_reserved, metadata_key};
use crate::cache::metadata::{CacheMetadata, MetadataTracker};
use crate::cache::single_flight::{Join, SingleFlight};
use crate::cache::store::KeyValueStore;
use crate::cache::tags::TagIndex;
use crate::cache::types::{CacheKey, CacheOptions, CacheStats, CacheStrategy, WarmupReport};
use crate::error::Result;
use futures::future::{join_all, BoxFuture};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Cache key paired with the fetch that produces its value, for warmup
pub struct WarmupEntry<T, E> {
    pub key: CacheKey,
    fetch: Box<dyn FnOnce() -> BoxFuture<'static, std::result::Result<T, E>> + Send>,
}

impl<T, E> WarmupEntry<T, E> {
    pub fn new<F, Fut>(key: impl Into<CacheKey>, fetch: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        Self {
            key: key.into(),
            fetch: Box::new(move || Box::pin(fetch())),
        }
    }
}

/// TTLs resolved for one call
#[derive(Debug, Clone, Copy)]
struct WritePlan {
    /// Freshness horizon before jitter
    ttl: Duration,
    stale_window: Duration,
    /// Entries outlive `ttl` by `stale_window`
    swr: bool,
}

impl WritePlan {
    /// Unjittered store lifetime
    fn horizon(&self) -> Duration {
        if self.swr {
            self.ttl + self.stale_window
        } else {
            self.ttl
        }
    }
}

fn serialize<T: Serialize + ?Sized>(key: &str, value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Failed to serialize value for {}: {}", key, e);
            None
        }
    }
}

/// Everything a background task needs to write an entry
#[derive(Clone)]
struct Writer {
    config: Arc<CacheConfig>,
    core: CacheCore,
    metadata: MetadataTracker,
    tags: TagIndex,
}

impl Writer {
    /// Write value, metadata and tag associations for `key`
    async fn store<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        plan: &WritePlan,
        tags: &[String],
        after_miss: bool,
    ) -> bool {
        match serialize(key, value) {
            Some(json) => self.store_json(key, &json, plan, tags, after_miss).await,
            None => false,
        }
    }

    /// Jitter applies to the fresh period only; the stale window follows it
    /// unjittered and metadata records both horizons.
    async fn store_json(
        &self,
        key: &str,
        json: &str,
        plan: &WritePlan,
        tags: &[String],
        after_miss: bool,
    ) -> bool {
        let fresh_for = self.config.ttl_with_jitter(plan.ttl);
        let ttl = if plan.swr {
            fresh_for + plan.stale_window
        } else {
            fresh_for
        };

        if !self.core.set_raw(key, json, ttl).await {
            return false;
        }

        self.metadata
            .record_write(key, json.len(), fresh_for, ttl, after_miss)
            .await;

        if !tags.is_empty() {
            self.tags.associate(key, tags).await;
        }

        true
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    write_behind_failures: AtomicU64,
}

/// Tag-indexed cache with pluggable read and write strategies
///
/// # Example
///
/// ```rust
/// use ouroboros_cache::{CacheConfig, CacheOptions, CacheService, MemoryStore};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let cache = CacheService::new(Arc::new(MemoryStore::new()), CacheConfig::default())?;
///
/// let options = CacheOptions::stale_while_revalidate()
///     .ttl(Duration::from_secs(60))
///     .tag("projects");
///
/// let name: String = cache
///     .get_with_advanced_cache(
///         "project:42",
///         || async { Ok::<_, std::io::Error>("Protein folding".to_string()) },
///         options,
///     )
///     .await?;
///
/// cache.invalidate_by_tags(&["projects".to_string()]).await;
/// # let _ = name;
/// # Ok(())
/// # }
/// ```
pub struct CacheService {
    writer: Writer,
    flights: SingleFlight,
    background: BackgroundTasks,
    counters: Arc<Counters>,
}

impl CacheService {
    /// Create a service over `store`, validating the configuration
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        info!("Initializing cache service with config: {:?}", config);

        let core = CacheCore::new(store);
        let metadata = MetadataTracker::new(core.clone());
        let tags = TagIndex::new(core.clone(), config.tag_ttl);
        let background = BackgroundTasks::new(config.max_concurrent_refreshes);

        Ok(Self {
            writer: Writer {
                config: Arc::new(config),
                core,
                metadata,
                tags,
            },
            flights: SingleFlight::new(),
            background,
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.writer.config
    }

    /// Primitive operations, including the plain `with_cache` wrapper
    pub fn core(&self) -> &CacheCore {
        &self.writer.core
    }

    pub fn metadata(&self) -> &MetadataTracker {
        &self.writer.metadata
    }

    pub fn tags(&self) -> &TagIndex {
        &self.writer.tags
    }

    fn plan(&self, options: &CacheOptions) -> WritePlan {
        let config = &self.writer.config;
        let ttl = options.ttl.unwrap_or(config.default_ttl);
        let stale_window = options.stale_window.unwrap_or(config.stale_window);

        WritePlan {
            ttl,
            stale_window,
            swr: options.strategy == CacheStrategy::StaleWhileRevalidate,
        }
    }

    /// Read and decode `key`, recording the hit in its metadata
    ///
    /// Under stale-while-revalidate an entry whose metadata says it is past
    /// its stale window reads as a miss.
    async fn lookup<T: DeserializeOwned>(
        &self,
        key: &str,
        plan: &WritePlan,
    ) -> Option<(T, Option<CacheMetadata>)> {
        let raw = self.writer.core.get_raw(key).await?;
        let value = decode::<T>(key, &raw)?;
        let existing = self.writer.metadata.get(key).await;

        if plan.swr && existing.as_ref().is_some_and(CacheMetadata::is_expired) {
            debug!("Entry {} is past its stale window", key);
            return None;
        }

        let metadata = self
            .writer
            .metadata
            .touch_loaded(key, existing, raw.len(), plan.horizon())
            .await;

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some((value, metadata))
    }

    /// Read `key` through the cache using the strategy in `options`
    ///
    /// On a hit the cached value is returned. Under
    /// [`CacheStrategy::StaleWhileRevalidate`], a hit older than its TTL but
    /// inside the stale window is still returned immediately while `fetch`
    /// runs in the background to replace it.
    ///
    /// On a miss `fetch` runs in the foreground; its result is written with
    /// metadata and tag associations and returned. Concurrent misses on the
    /// same key share one fetch when single-flight is enabled, whether or
    /// not the store accepted the write. If the shared fetch fails, each
    /// waiting caller runs its own.
    ///
    /// Errors from `fetch` on the foreground path are returned unchanged.
    pub async fn get_with_advanced_cache<T, F, Fut, E>(
        &self,
        key: &str,
        fetch: F,
        options: CacheOptions,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let plan = self.plan(&options);

        if let Some((value, metadata)) = self.lookup::<T>(key, &plan).await {
            debug!("Cache hit: {}", key);
            if plan.swr {
                if let Some(m) = metadata.filter(CacheMetadata::is_stale) {
                    debug!("Entry {} is stale (age {:?})", key, m.age());
                    self.schedule_refresh(key, fetch, plan, options.tags);
                }
            }
            return Ok(value);
        }

        let flight = if self.writer.config.enable_single_flight {
            match self.flights.join(key) {
                Join::Leader(guard) => Some(guard),
                Join::Follower(waiter) => {
                    let shared = waiter.wait().await;
                    if let Some(value) = shared.and_then(|json| decode::<T>(key, &json)) {
                        debug!("Cache filled by concurrent fetch: {}", key);
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(value);
                    }
                    debug!("Concurrent fetch for {} failed, fetching again", key);
                    None
                }
            }
        } else {
            None
        };

        debug!("Cache miss: {}", key);
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let value = fetch().await?;
        let json = serialize(key, &value);
        let cached = match &json {
            Some(json) => {
                self.writer
                    .store_json(key, json, &plan, &options.tags, true)
                    .await
            }
            None => false,
        };
        if !cached {
            debug!("Returning uncached value for {}", key);
        }

        if let Some(guard) = flight {
            guard.complete(json.map(Arc::from));
        }

        Ok(value)
    }

    fn schedule_refresh<T, F, Fut, E>(&self, key: &str, fetch: F, plan: WritePlan, tags: Vec<String>)
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let writer = self.writer.clone();
        let owned_key = key.to_string();

        let scheduled = self.background.spawn_refresh(key, async move {
            match fetch().await {
                Ok(value) => {
                    if writer.store(&owned_key, &value, &plan, &tags, false).await {
                        debug!("Refreshed stale entry {}", owned_key);
                    }
                }
                Err(e) => warn!("Background refresh failed for {}: {}", owned_key, e),
            }
        });

        if scheduled {
            debug!("Serving stale {} while refreshing", key);
        }
    }

    /// Pre-populate the cache
    ///
    /// Entries are fetched in batches of `warmup_batch_size`, concurrently
    /// within a batch and one batch after another. Keys that already hold a
    /// value are skipped. Failures are logged and reported, never raised.
    pub async fn warmup_cache<T, E>(
        &self,
        entries: Vec<WarmupEntry<T, E>>,
        options: CacheOptions,
    ) -> WarmupReport
    where
        T: Serialize + Send,
        E: Display + Send,
    {
        let plan = self.plan(&options);
        let batch_size = self.writer.config.warmup_batch_size;
        let total = entries.len();
        let mut report = WarmupReport::default();
        let mut entries = entries.into_iter().peekable();

        info!("Warming {} cache entries (batch size {})", total, batch_size);

        while entries.peek().is_some() {
            let batch: Vec<_> = entries.by_ref().take(batch_size).collect();
            let results = join_all(
                batch
                    .into_iter()
                    .map(|entry| self.warm_one(entry, &plan, &options.tags)),
            )
            .await;

            for (key, outcome) in results {
                match outcome {
                    WarmOutcome::Warmed => report.warmed.push(key),
                    WarmOutcome::Skipped => report.skipped.push(key),
                    WarmOutcome::Failed => report.failed.push(key),
                }
            }
        }

        info!(
            "Cache warmup complete: {} warmed, {} skipped, {} failed",
            report.warmed.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    async fn warm_one<T, E>(
        &self,
        entry: WarmupEntry<T, E>,
        plan: &WritePlan,
        tags: &[String],
    ) -> (CacheKey, WarmOutcome)
    where
        T: Serialize,
        E: Display,
    {
        let WarmupEntry { key, fetch } = entry;

        if self.writer.core.exists(&key).await == Some(true) {
            debug!("Warmup skipping cached key {}", key);
            return (key, WarmOutcome::Skipped);
        }

        match fetch().await {
            Ok(value) => {
                if self.writer.store(&key, &value, plan, tags, false).await {
                    (key, WarmOutcome::Warmed)
                } else {
                    warn!("Warmup could not write {}", key);
                    (key, WarmOutcome::Failed)
                }
            }
            Err(e) => {
                warn!("Warmup fetch failed for {}: {}", key, e);
                (key, WarmOutcome::Failed)
            }
        }
    }

    /// Delete metadata records whose data has expired
    ///
    /// Returns `None` if the metadata scan failed.
    pub async fn prune_orphans(&self) -> Option<InvalidationEvent> {
        let records = self.writer.metadata.all().await?;
        let (_, event) = self.split_orphans(records).await;
        Some(event)
    }

    /// Separate live records from orphans, deleting the orphans
    async fn split_orphans(
        &self,
        records: Vec<(CacheKey, CacheMetadata)>,
    ) -> (Vec<(CacheKey, CacheMetadata)>, InvalidationEvent) {
        let mut live = Vec::with_capacity(records.len());
        let mut orphans = Vec::new();
        let mut failures = 0;

        for (key, metadata) in records {
            // Keep the record when the store cannot answer
            if self.writer.core.exists(&key).await != Some(false) {
                live.push((key, metadata));
                continue;
            }

            debug!("Pruning orphaned metadata for {}", key);
            if !self.writer.metadata.remove(&key).await {
                failures += 1;
            }
            orphans.push(key);
        }

        if !orphans.is_empty() {
            info!("Pruned {} orphaned metadata records", orphans.len() - failures);
        }
        let event = InvalidationEvent::new(InvalidationReason::Orphaned, orphans)
            .with_failures(failures);
        (live, event)
    }

    /// Aggregate statistics over all metadata and tag records
    ///
    /// With `reconcile_orphans`, metadata whose data has expired is deleted
    /// and excluded, and tag key-sets are pruned before counting.
    pub async fn get_cache_stats(&self) -> CacheStats {
        let reconcile = self.writer.config.reconcile_orphans;
        let mut records = self.writer.metadata.all().await.unwrap_or_default();

        let mut stats = CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            write_behind_failures: self.counters.write_behind_failures.load(Ordering::Relaxed),
            refreshes_skipped: self.background.refreshes_skipped(),
            ..Default::default()
        };

        if reconcile {
            let (live, event) = self.split_orphans(records).await;
            stats.orphans_pruned = event.keys.len() - event.failures;
            records = live;
        }

        let mut hit_rate_sum = 0.0;
        let mut access_sum = 0u64;

        for (_, metadata) in records {
            stats.total_entries += 1;
            stats.total_size += metadata.size;
            hit_rate_sum += metadata.hit_rate.clamp(0.0, 1.0);
            access_sum += metadata.access_count;
        }

        if stats.total_entries > 0 {
            let n = stats.total_entries as f64;
            stats.hit_rate = (hit_rate_sum / n).clamp(0.0, 1.0);
            stats.avg_access_count = access_sum as f64 / n;
        }

        stats.tag_stats = self
            .writer
            .tags
            .tag_counts(reconcile)
            .await
            .unwrap_or_default();

        stats
    }

    /// Write to the system of record, then to the cache
    ///
    /// The cache is only written once `write_fn` succeeds, so it never runs
    /// ahead of the database. A database error is returned and leaves the
    /// cache untouched. `Ok(false)` means the database write succeeded but
    /// the cache write did not.
    pub async fn set_with_write_through<T, F, Fut, R, E>(
        &self,
        key: &str,
        value: T,
        write_fn: F,
        options: CacheOptions,
    ) -> std::result::Result<bool, E>
    where
        T: Serialize + Clone,
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: Display,
    {
        if let Err(e) = write_fn(value.clone()).await {
            warn!("Write-through database write failed for {}: {}", key, e);
            return Err(e);
        }

        let plan = self.plan(&options);
        Ok(self
            .writer
            .store(key, &value, &plan, &options.tags, false)
            .await)
    }

    /// Write to the cache now and to the system of record in the background
    ///
    /// Returns whether the cache write succeeded. The database write is
    /// retried `write_behind_max_retries` times; a final failure is logged
    /// and counted in [`CacheStats::write_behind_failures`] but never
    /// reaches the caller, so cache and database may diverge.
    pub async fn set_with_write_behind<T, F, Fut, R, E>(
        &self,
        key: &str,
        value: T,
        write_fn: F,
        options: CacheOptions,
    ) -> bool
    where
        T: Serialize + Clone + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Send + 'static,
        E: Display + Send + 'static,
    {
        let plan = self.plan(&options);
        let cached = self
            .writer
            .store(key, &value, &plan, &options.tags, false)
            .await;

        let retries = self.writer.config.write_behind_max_retries;
        let delay = self.writer.config.write_behind_retry_delay;
        let counters = Arc::clone(&self.counters);
        let key = key.to_string();

        self.background.spawn(async move {
            let mut attempt = 0;
            loop {
                match write_fn(value.clone()).await {
                    Ok(_) => {
                        debug!("Write-behind persisted {}", key);
                        break;
                    }
                    Err(e) if attempt < retries => {
                        attempt += 1;
                        warn!(
                            "Write-behind for {} failed (attempt {}/{}): {}",
                            key,
                            attempt,
                            retries + 1,
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => {
                        error!("Write-behind for {} failed permanently: {}", key, e);
                        counters.write_behind_failures.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
            }
        });

        cached
    }

    /// Remove one entry and its metadata
    pub async fn invalidate(&self, key: &str) -> bool {
        self.invalidate_detailed(&[key.to_string()])
            .await
            .is_complete()
    }

    /// Remove entries and their metadata, reported as one manual event
    pub async fn invalidate_detailed(&self, keys: &[CacheKey]) -> InvalidationOutcome {
        let doomed: Vec<String> = keys
            .iter()
            .flat_map(|k| [k.clone(), metadata_key(k)])
            .collect();

        let failures = if self.writer.core.delete_many(&doomed).await {
            0
        } else {
            keys.len()
        };

        InvalidationOutcome {
            events: vec![InvalidationEvent::new(InvalidationReason::Manual, keys.to_vec())
                .with_failures(failures)],
        }
    }

    /// Remove every data key matching `pattern`, with its metadata
    ///
    /// Reserved `metadata:` and `tags:` keys are never matched directly.
    pub async fn invalidate_pattern(&self, pattern: &str) -> bool {
        let Some(keys) = self.writer.core.scan(pattern).await else {
            return false;
        };

        let keys: Vec<CacheKey> = keys.into_iter().filter(|k| !is_reserved(k)).collect();
        info!("Invalidating {} keys matching {}", keys.len(), pattern);

        let outcome = self.invalidate_detailed(&keys).await;
        outcome.is_complete()
    }

    /// Remove every entry registered under any of `tags`
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> bool {
        self.writer.tags.invalidate_tags(tags).await
    }

    pub async fn invalidate_by_tags_detailed(&self, tags: &[String]) -> InvalidationOutcome {
        self.writer.tags.invalidate_tags_detailed(tags).await
    }

    pub async fn keys_for_tag(&self, tag: &str) -> Vec<CacheKey> {
        self.writer.tags.keys_for_tag(tag).await
    }

    /// Wait for outstanding background refreshes and write-behind writes
    pub async fn flush_background(&self) {
        self.background.drain().await;
    }

    /// Keys with a foreground fetch in progress
    pub fn fetches_in_flight(&self) -> usize {
        self.flights.in_flight()
    }
}

enum WarmOutcome {
    Warmed,
    Skipped,
    Failed,
}
