//! Shared TTL tier backed by Redis.
//!
//! Every failure in here is logged and reported as a miss or a skipped
//! write. Callers never see a Redis error.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::error::{AppError, Result};
use crate::models::CacheEntry;

const KEY_PREFIX: &str = "forum-ingest:topics:";

pub fn cache_key(source_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, source_id)
}

#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, source_id: &str) -> Option<CacheEntry>;

    /// Returns whether the entry was stored.
    async fn set(&self, entry: &CacheEntry, ttl: Duration) -> bool;

    async fn delete(&self, source_id: &str);

    fn is_configured(&self) -> bool {
        true
    }
}

/// Used when no Redis URL is configured.
pub struct NoDistributedCache;

#[async_trait]
impl DistributedCache for NoDistributedCache {
    async fn get(&self, _source_id: &str) -> Option<CacheEntry> {
        None
    }

    async fn set(&self, _entry: &CacheEntry, _ttl: Duration) -> bool {
        false
    }

    async fn delete(&self, _source_id: &str) {}

    fn is_configured(&self) -> bool {
        false
    }
}

pub struct RedisCache {
    pool: Pool,
}

/// Build a deadpool-redis pool with uniform wait/create/recycle timeouts.
pub fn create_pool(url: &str, pool_size: usize, timeout: Duration) -> Result<Pool> {
    let mut config = deadpool_redis::Config::from_url(url);
    let mut pool_config = deadpool_redis::PoolConfig::new(pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    config.pool = Some(pool_config);

    config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| AppError::Config(format!("invalid redis configuration: {}", e)))
}

impl RedisCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DistributedCache for RedisCache {
    async fn get(&self, source_id: &str) -> Option<CacheEntry> {
        let key = cache_key(source_id);
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to get Redis connection");
                return None;
            }
        };

        match conn.get::<_, Option<String>>(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => {
                    tracing::debug!(key = %key, "cache hit (distributed)");
                    Some(entry)
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Redis GET error");
                None
            }
        }
    }

    async fn set(&self, entry: &CacheEntry, ttl: Duration) -> bool {
        let key = cache_key(&entry.source_id);
        let payload = match serde_json::to_string(entry) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode cache entry");
                return false;
            }
        };

        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to get Redis connection");
                return false;
            }
        };

        let ttl_secs = ttl.as_secs().max(1);
        match conn.set_ex::<_, _, ()>(&key, payload, ttl_secs).await {
            Ok(()) => {
                tracing::debug!(key = %key, ttl_secs, "cache set (distributed)");
                true
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Redis SET error");
                false
            }
        }
    }

    async fn delete(&self, source_id: &str) {
        let key = cache_key(source_id);
        match self.pool.get().await {
            Ok(mut conn) => {
                if let Err(e) = conn.del::<_, ()>(&key).await {
                    tracing::warn!(key = %key, error = %e, "Redis DEL error");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to get Redis connection"),
        }
    }
}
