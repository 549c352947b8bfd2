use std::sync::Arc;
use std::time::Duration;

use crate::db::Repository;
use crate::error::Result;
use crate::models::{CacheEntry, Topic};

use super::{DistributedCache, MemoryCache};

/// Read-through / write-through topic cache.
///
/// Reads consult the distributed tier, then the memory tier, and never touch
/// the durable store. Writes go durable, distributed, then memory; the memory
/// write always happens.
pub struct TieredCache {
    repository: Repository,
    distributed: Arc<dyn DistributedCache>,
    memory: MemoryCache,
    ttl: Duration,
}

impl TieredCache {
    pub fn new(
        repository: Repository,
        distributed: Arc<dyn DistributedCache>,
        ttl: Duration,
    ) -> Self {
        Self {
            repository,
            distributed,
            memory: MemoryCache::new(ttl),
            ttl,
        }
    }

    pub async fn get(&self, source_id: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.distributed.get(source_id).await {
            return Some(entry);
        }
        self.memory.get(source_id)
    }

    /// Store a successful fetch in every tier.
    pub async fn put(&self, source_id: &str, topics: Vec<Topic>) {
        match self.repository.upsert_topics(topics.clone()).await {
            Ok(n) => tracing::debug!(source = %source_id, topics = n, "Topics persisted"),
            Err(e) => tracing::error!(source = %source_id, error = %e, "Failed to persist topics"),
        }

        let entry = CacheEntry::fresh(source_id, topics);
        if !self.distributed.set(&entry, self.ttl).await && self.distributed.is_configured() {
            tracing::debug!(source = %source_id, "Distributed write skipped, memory tier only");
        }
        self.memory.insert(entry);
    }

    /// Note a failed fetch. A cached snapshot is never evicted or replaced;
    /// the error is only kept when nothing is cached for the source.
    pub fn record_failure(&self, source_id: &str, error: String) {
        if !self.memory.contains(source_id) {
            self.memory.insert(CacheEntry::failed(source_id, error));
        }
    }

    /// Drop every cached snapshot. The durable store is untouched.
    pub async fn clear(&self) -> Result<()> {
        self.memory.clear();
        for source in self.repository.get_sources().await? {
            self.distributed.delete(&source.id).await;
        }
        Ok(())
    }

    /// Topics of the given sources, most recently bumped first. Sources with
    /// nothing cached contribute nothing.
    pub async fn cached_topics(&self, source_ids: &[String]) -> Vec<Topic> {
        let mut topics = Vec::new();
        for source_id in source_ids {
            if let Some(entry) = self.get(source_id).await {
                topics.extend(entry.topics);
            }
        }
        topics.sort_by(|a, b| b.bumped_at.cmp(&a.bumped_at));
        topics
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_distributed(&self) -> bool {
        self.distributed.is_configured()
    }
}
