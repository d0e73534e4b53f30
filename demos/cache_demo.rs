//! Cache Demo Application
//!
//! Walks through each caching strategy against the in-memory store.
//!
//! Usage:
//!   cargo run --example cache_demo
//!
//! Environment variables:
//!   RUST_LOG                 - log filter (default: ouroboros_cache=debug,cache_demo=info)
//!   CACHE_DEFAULT_TTL_SECS   - default entry TTL
//!   CACHE_STALE_WINDOW_SECS  - stale-while-revalidate grace window

use ouroboros_cache::{
    CacheConfig, CacheKeyBuilder, CacheOptions, CacheService, MemoryStore, WarmupEntry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Project {
    id: u32,
    name: String,
}

async fn load_project(id: u32) -> anyhow::Result<Project> {
    // Stand-in for a database round trip
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(Project {
        id,
        name: format!("project-{}", id),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "ouroboros_cache=debug,cache_demo=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Tag-Indexed Cache Demo ===");

    let config = CacheConfig::from_env()?;
    let store = Arc::new(MemoryStore::new());
    let _cleanup = store.spawn_auto_cleanup(config.cleanup_interval);
    let cache = CacheService::new(store, config)?;

    info!("\n--- Read-through ---");
    let key = CacheKeyBuilder::new("project")
        .identifier("1")
        .param("view", "summary")
        .build();
    let options = CacheOptions::simple().tag("projects");
    for _ in 0..2 {
        let project = cache
            .get_with_advanced_cache(&key, || load_project(1), options.clone())
            .await?;
        info!("Loaded {:?}", project);
    }

    info!("\n--- Stale-while-revalidate ---");
    let swr = CacheOptions::stale_while_revalidate()
        .ttl(Duration::from_millis(200))
        .stale_window(Duration::from_secs(5))
        .tag("projects");
    cache
        .get_with_advanced_cache("project:2", || load_project(2), swr.clone())
        .await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let stale = cache
        .get_with_advanced_cache("project:2", || load_project(2), swr)
        .await?;
    info!("Served stale {:?} while refreshing", stale);
    cache.flush_background().await;

    info!("\n--- Write-through ---");
    match cache
        .set_with_write_through(
            "project:3",
            Project {
                id: 3,
                name: "renamed".to_string(),
            },
            |project| async move {
                info!("Persisting {:?}", project);
                Ok::<_, anyhow::Error>(())
            },
            CacheOptions::simple().tag("projects"),
        )
        .await
    {
        Ok(cached) => info!("✓ Database written, cached: {}", cached),
        Err(e) => info!("✗ Database write failed: {}", e),
    }

    info!("\n--- Write-behind ---");
    let cached = cache
        .set_with_write_behind(
            "project:4",
            Project {
                id: 4,
                name: "draft".to_string(),
            },
            |project| async move {
                Err::<(), _>(anyhow::anyhow!("replica read-only, dropping {}", project.id))
            },
            CacheOptions::simple(),
        )
        .await;
    info!("Cached before the database write: {}", cached);
    cache.flush_background().await;

    info!("\n--- Warmup ---");
    let entries = (10..17)
        .map(|id| WarmupEntry::new(format!("project:{}", id), move || load_project(id)))
        .collect();
    let report = cache
        .warmup_cache(entries, CacheOptions::simple().tag("projects"))
        .await;
    info!(
        "Warmed {}, skipped {}, failed {}",
        report.warmed.len(),
        report.skipped.len(),
        report.failed.len()
    );

    info!("\n--- Statistics ---");
    let stats = cache.get_cache_stats().await;
    info!("{}", stats);
    for (tag, count) in &stats.tag_stats {
        info!("  tag {}: {} keys", tag, count);
    }
    info!("  write-behind failures: {}", stats.write_behind_failures);

    info!("\n--- Tag invalidation ---");
    let outcome = cache
        .invalidate_by_tags_detailed(&["projects".to_string()])
        .await;
    for event in &outcome.events {
        info!("{}: {} keys, {} failures", event.reason, event.keys.len(), event.failures);
    }
    info!("{}", cache.get_cache_stats().await);

    Ok(())
}
