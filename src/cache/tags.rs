//! Reverse index from tag to cache keys
//!
//! Each tag's key-set is a JSON array stored under `tags:<tag>`. Sets are
//! read-modify-written without locking; two concurrent associations with
//! the same tag can race and drop one key, which only costs a missed
//! invalidation for an entry that will still expire by TTL.
//!
//! A set that cannot be read is never overwritten: writing a fresh set
//! over it would silently drop every key already registered.

use crate::cache::core::CacheCore;
use crate::cache::invalidation::{InvalidationEvent, InvalidationOutcome, InvalidationReason};
use crate::cache::keys::{metadata_key, tag_from_store_key, tag_key, TAG_PREFIX};
use crate::cache::types::CacheKey;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct TagIndex {
    core: CacheCore,
    tag_ttl: Duration,
}

impl TagIndex {
    pub fn new(core: CacheCore, tag_ttl: Duration) -> Self {
        Self { core, tag_ttl }
    }

    /// Register `key` under each tag. Returns false if any tag could not
    /// be read or written.
    pub async fn associate(&self, key: &str, tags: &[String]) -> bool {
        let mut ok = true;

        for tag in tags {
            let mut keys = match self.load_strict(tag).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!("Skipping tag {} for {}: key-set unreadable: {}", tag, key, e);
                    ok = false;
                    continue;
                }
            };
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }

            if !self.core.set(&tag_key(tag), &keys, self.tag_ttl).await {
                warn!("Failed to associate {} with tag {}", key, tag);
                ok = false;
            }
        }

        ok
    }

    /// Keys currently registered under `tag`
    ///
    /// Keys whose data has expired are pruned from the set on the way out.
    /// The pruned set keeps the record's remaining lifetime.
    pub async fn keys_for_tag(&self, tag: &str) -> Vec<CacheKey> {
        let keys = self.load(tag).await.unwrap_or_default();
        if keys.is_empty() {
            return keys;
        }

        let mut live = Vec::with_capacity(keys.len());
        for key in &keys {
            // Keep the key when the store cannot answer
            if self.core.exists(key).await != Some(false) {
                live.push(key.clone());
            }
        }

        let pruned = keys.len() - live.len();
        if pruned > 0 {
            debug!("Pruned {} expired keys from tag {}", pruned, tag);
            let store_key = tag_key(tag);
            if live.is_empty() {
                self.core.delete(&store_key).await;
            } else if let Some(remaining) = self.core.remaining_ttl(&store_key).await {
                self.core.set(&store_key, &live, remaining).await;
            }
        }

        live
    }

    /// Delete every entry (data and metadata) registered under the tags,
    /// then the tag records themselves
    ///
    /// Returns false if any deletion failed. Processing continues past
    /// failures, so a false result may leave a tag group partly removed.
    pub async fn invalidate_tags(&self, tags: &[String]) -> bool {
        self.invalidate_tags_detailed(tags).await.is_complete()
    }

    /// Same as [`TagIndex::invalidate_tags`], reporting one event per tag
    pub async fn invalidate_tags_detailed(&self, tags: &[String]) -> InvalidationOutcome {
        let mut outcome = InvalidationOutcome::default();

        for tag in tags {
            let reason = InvalidationReason::TagMatch { tag: tag.clone() };

            let keys = match self.load_strict(tag).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!("Could not read key-set for tag {}: {}", tag, e);
                    // A corrupt record would otherwise block every later association
                    let mut failures = 1;
                    if !self.core.delete(&tag_key(tag)).await {
                        failures += 1;
                    }
                    outcome.events.push(
                        InvalidationEvent::new(reason, Vec::new())
                            .with_failures(failures)
                            .with_context(format!("key-set unreadable: {}", e)),
                    );
                    continue;
                }
            };

            let mut failures = 0;
            for key in &keys {
                if !self.core.delete_many(&[key.clone(), metadata_key(key)]).await {
                    warn!("Failed to invalidate {} (tag {})", key, tag);
                    failures += 1;
                }
            }

            if !self.core.delete(&tag_key(tag)).await {
                failures += 1;
            }

            info!("Invalidated {} entries with tag: {}", keys.len(), tag);
            outcome
                .events
                .push(InvalidationEvent::new(reason, keys).with_failures(failures));
        }

        outcome
    }

    /// Cardinality of every tag's key-set. `None` if the scan failed.
    ///
    /// With `prune`, expired keys are dropped from each set first.
    pub async fn tag_counts(&self, prune: bool) -> Option<BTreeMap<String, usize>> {
        let pattern = format!("{}*", TAG_PREFIX);
        let store_keys = self.core.scan(&pattern).await?;
        let mut counts = BTreeMap::new();

        for store_key in store_keys {
            let Some(tag) = tag_from_store_key(&store_key) else {
                continue;
            };
            let count = if prune {
                self.keys_for_tag(tag).await.len()
            } else {
                self.load(tag).await.map(|k| k.len()).unwrap_or(0)
            };
            if count > 0 {
                counts.insert(tag.to_string(), count);
            }
        }

        Some(counts)
    }

    async fn load(&self, tag: &str) -> Option<Vec<CacheKey>> {
        self.core.get(&tag_key(tag)).await
    }

    /// Like `load`, but an absent set is the only way to get an empty one.
    /// Store failures and undecodable records are errors.
    async fn load_strict(&self, tag: &str) -> crate::error::Result<Vec<CacheKey>> {
        match self.core.store().get(&tag_key(tag)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::test_support::ToggleStore;
    use crate::cache::store::MemoryStore;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    fn index_over(core: &CacheCore) -> TagIndex {
        TagIndex::new(core.clone(), Duration::from_secs(3600))
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_associate_is_idempotent() {
        let core = CacheCore::new(Arc::new(MemoryStore::new()));
        let index = index_over(&core);
        core.set("paper:1", &"x", TTL).await;

        assert!(index.associate("paper:1", &tags(&["papers"])).await);
        assert!(index.associate("paper:1", &tags(&["papers"])).await);

        assert_eq!(index.keys_for_tag("papers").await, vec!["paper:1"]);
    }

    #[tokio::test]
    async fn test_invalidate_removes_data_metadata_and_tag() {
        let core = CacheCore::new(Arc::new(MemoryStore::new()));
        let index = index_over(&core);

        for key in ["paper:1", "paper:2"] {
            core.set(key, &"x", TTL).await;
            core.set(&metadata_key(key), &"m", TTL).await;
            index.associate(key, &tags(&["papers"])).await;
        }
        core.set("team:1", &"y", TTL).await;
        index.associate("team:1", &tags(&["teams"])).await;

        assert!(index.invalidate_tags(&tags(&["papers"])).await);

        for key in ["paper:1", "paper:2"] {
            assert!(core.get::<String>(key).await.is_none());
            assert!(core.get::<String>(&metadata_key(key)).await.is_none());
        }
        assert!(index.keys_for_tag("papers").await.is_empty());
        assert_eq!(core.get::<String>("team:1").await, Some("y".to_string()));
        assert_eq!(index.keys_for_tag("teams").await, vec!["team:1"]);
    }

    #[tokio::test]
    async fn test_keys_for_tag_prunes_expired_keys() {
        let core = CacheCore::new(Arc::new(MemoryStore::new()));
        let index = index_over(&core);

        core.set("short", &1u8, Duration::from_millis(30)).await;
        core.set("long", &2u8, TTL).await;
        index.associate("short", &tags(&["t"])).await;
        index.associate("long", &tags(&["t"])).await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(index.keys_for_tag("t").await, vec!["long"]);
        let stored: Vec<String> = core.get(&tag_key("t")).await.unwrap();
        assert_eq!(stored, vec!["long"]);
    }

    #[tokio::test]
    async fn test_tag_counts() {
        let core = CacheCore::new(Arc::new(MemoryStore::new()));
        let index = index_over(&core);
        for key in ["a", "b"] {
            core.set(key, &0u8, TTL).await;
        }
        index.associate("a", &tags(&["x", "y"])).await;
        index.associate("b", &tags(&["x"])).await;

        let counts = index.tag_counts(true).await.unwrap();
        assert_eq!(counts.get("x"), Some(&2));
        assert_eq!(counts.get("y"), Some(&1));
    }

    #[tokio::test]
    async fn test_unreadable_key_set_is_not_overwritten() {
        let store = Arc::new(ToggleStore::default());
        let core = CacheCore::new(store.clone());
        let index = index_over(&core);
        core.set("paper:1", &1u8, TTL).await;
        core.set("paper:2", &2u8, TTL).await;
        assert!(index.associate("paper:1", &tags(&["papers"])).await);

        store.set_failing(true);
        assert!(!index.associate("paper:2", &tags(&["papers"])).await);
        store.set_failing(false);

        assert_eq!(index.keys_for_tag("papers").await, vec!["paper:1"]);
        assert!(index.invalidate_tags(&tags(&["papers"])).await);
        assert!(core.get::<u8>("paper:1").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_key_set_blocks_association_until_invalidated() {
        let core = CacheCore::new(Arc::new(MemoryStore::new()));
        let index = index_over(&core);
        core.set_raw(&tag_key("papers"), "{not json", TTL).await;

        assert!(!index.associate("paper:1", &tags(&["papers"])).await);
        assert_eq!(
            core.get_raw(&tag_key("papers")).await.as_deref(),
            Some("{not json")
        );

        let outcome = index.invalidate_tags_detailed(&tags(&["papers"])).await;
        assert!(!outcome.is_complete());
        assert!(core.get_raw(&tag_key("papers")).await.is_none());

        core.set("paper:1", &1u8, TTL).await;
        assert!(index.associate("paper:1", &tags(&["papers"])).await);
    }

    #[tokio::test]
    async fn test_pruning_keeps_remaining_tag_lifetime() {
        let core = CacheCore::new(Arc::new(MemoryStore::new()));
        let index = TagIndex::new(core.clone(), Duration::from_millis(400));

        core.set("short", &1u8, Duration::from_millis(30)).await;
        core.set("long", &2u8, TTL).await;
        index.associate("short", &tags(&["t"])).await;
        index.associate("long", &tags(&["t"])).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(index.keys_for_tag("t").await, vec!["long"]);

        // Still expires on its original schedule
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(core.get_raw(&tag_key("t")).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_reports_failure_and_continues() {
        let store = Arc::new(ToggleStore::default());
        let core = CacheCore::new(store.clone());
        let index = index_over(&core);
        core.set("a", &0u8, TTL).await;
        index.associate("a", &tags(&["x"])).await;

        store.set_failing(true);
        let outcome = index.invalidate_tags_detailed(&tags(&["x", "y"])).await;
        assert_eq!(outcome.events.len(), 2);
        assert!(!outcome.is_complete());
        assert!(!index.invalidate_tags(&tags(&["x"])).await);
    }
}
