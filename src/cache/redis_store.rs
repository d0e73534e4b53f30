//! Redis-backed store
//!
//! Requires the `redis` feature.

use crate::cache::store::KeyValueStore;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::time::Duration;
use tracing::info;

/// Redis connection configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

impl RedisConfig {
    /// Read `REDIS_URL`, loading `.env` first
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| Self::default().url),
        }
    }
}

/// Store over a multiplexed Redis connection
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        info!("Connecting to Redis at {}", config.url);

        let client = Client::open(config.url.as_str())
            .map_err(|e| CacheError::ConfigError(format!("Redis client error: {}", e)))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::StoreError(format!("Redis connection error: {}", e)))?;

        Ok(Self { conn })
    }
}

fn store_err(command: &str, e: redis::RedisError) -> CacheError {
    CacheError::StoreError(format!("Redis {} error: {}", command, e))
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| store_err("GET", e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let millis = ttl.as_millis().max(1) as u64;
        conn.pset_ex::<_, _, ()>(key, value, millis)
            .await
            .map_err(|e| store_err("PSETEX", e))
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.del::<_, usize>(keys)
            .await
            .map_err(|e| store_err("DEL", e))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.keys(pattern).await.map_err(|e| store_err("KEYS", e))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(|e| store_err("EXISTS", e))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        // -2 for a missing key, -1 for one without expiry
        let millis: i64 = conn.pttl(key).await.map_err(|e| store_err("PTTL", e))?;
        Ok((millis > 0).then(|| Duration::from_millis(millis as u64)))
    }
}
