//! Lease-style mutual exclusion for the refresh cycle.
//!
//! A lease expires on its own, so a holder that dies without releasing only
//! blocks other instances until the TTL runs out.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{AppError, Result};

#[async_trait]
pub trait LeaseLock: Send + Sync {
    /// Take the lease if nobody holds it. Never waits.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Drop the lease if `owner` still holds it.
    async fn release(&self, key: &str, owner: &str) -> Result<()>;
}

/// Process-local lease table.
#[derive(Default)]
pub struct LocalLeaseLock {
    leases: Mutex<HashMap<String, (String, Instant)>>,
}

impl LocalLeaseLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseLock for LocalLeaseLock {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();
        if let Some((_, expires_at)) = leases.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        leases.insert(key.to_string(), (owner.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<()> {
        let mut leases = self.leases.lock().await;
        if leases.get(key).is_some_and(|(holder, _)| holder == owner) {
            leases.remove(key);
        }
        Ok(())
    }
}

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Cluster-wide lease via `SET NX EX`. Falls back to a process-local lease
/// while Redis is unreachable.
pub struct RedisLeaseLock {
    pool: Pool,
    fallback: LocalLeaseLock,
}

impl RedisLeaseLock {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            fallback: LocalLeaseLock::new(),
        }
    }

    async fn acquire_remote(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Other(anyhow::anyhow!("redis pool: {}", e)))?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release_remote(&self, key: &str, owner: &str) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Other(anyhow::anyhow!("redis pool: {}", e)))?;
        let _deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LeaseLock for RedisLeaseLock {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        match self.acquire_remote(key, owner, ttl).await {
            Ok(acquired) => Ok(acquired),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Redis lock unavailable, using local lease");
                self.fallback.try_acquire(key, owner, ttl).await
            }
        }
    }

    async fn release(&self, key: &str, owner: &str) -> Result<()> {
        if let Err(e) = self.release_remote(key, owner).await {
            tracing::warn!(key = %key, error = %e, "Failed to release Redis lock");
        }
        self.fallback.release(key, owner).await
    }
}
