use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Topic;

/// Cached topic-list snapshot for one source in one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source_id: String,
    pub topics: Vec<Topic>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheEntry {
    pub fn fresh(source_id: &str, topics: Vec<Topic>) -> Self {
        Self {
            source_id: source_id.to_string(),
            topics,
            fetched_at: Utc::now(),
            error: None,
        }
    }

    /// Marker entry for a source that has never fetched successfully.
    pub fn failed(source_id: &str, error: String) -> Self {
        Self {
            source_id: source_id.to_string(),
            topics: Vec::new(),
            fetched_at: Utc::now(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub is_refreshing: bool,
    pub last_refresh_start: Option<DateTime<Utc>>,
    pub distributed: bool,
}
