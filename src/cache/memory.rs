use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::models::CacheEntry;

#[derive(Clone, Debug)]
struct MemoryEntry {
    entry: CacheEntry,
    stored_at: Instant,
}

/// Process-local fallback tier. Entries are honoured for twice the
/// distributed TTL before they count as absent.
pub struct MemoryCache {
    entries: DashMap<String, MemoryEntry>,
    max_age: Duration,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_age: ttl.saturating_mul(2),
        }
    }

    pub fn get(&self, source_id: &str) -> Option<CacheEntry> {
        if let Some(stored) = self.entries.get(source_id) {
            if stored.stored_at.elapsed() <= self.max_age {
                return Some(stored.entry.clone());
            }
        }
        // Re-checked under the shard lock so a fresh insert is never dropped.
        let max_age = self.max_age;
        self.entries
            .remove_if(source_id, |_, stored| stored.stored_at.elapsed() > max_age);
        None
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.get(source_id).is_some()
    }

    pub fn insert(&self, entry: CacheEntry) {
        self.entries.insert(
            entry.source_id.clone(),
            MemoryEntry {
                entry,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let max_age = self.max_age;
        self.entries
            .retain(|_, stored| stored.stored_at.elapsed() <= max_age);
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn honours_entries_up_to_twice_the_ttl() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.insert(CacheEntry::fresh("gov", Vec::new()));

        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(cache.get("gov").is_some());
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get("gov").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_check_keeps_a_replacement_entry() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.insert(CacheEntry::failed("gov", "old".into()));
        tokio::time::advance(Duration::from_secs(121)).await;

        // A fresh snapshot lands before the stale one is looked at.
        cache.insert(CacheEntry::fresh("gov", Vec::new()));
        let entry = cache.get("gov").unwrap();
        assert!(entry.error.is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn insert_replaces_previous_snapshot() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache.insert(CacheEntry::failed("gov", "boom".into()));
        cache.insert(CacheEntry::fresh("gov", Vec::new()));

        let entry = cache.get("gov").unwrap();
        assert!(entry.error.is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(!cache.contains("gov"));
    }
}
