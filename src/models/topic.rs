use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One discussion thread of a source. Unique by `(source_id, external_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub source_id: String,
    pub external_id: i64,
    pub title: String,
    pub slug: String,
    pub tags: Vec<String>,
    pub posts_count: i64,
    pub views: i64,
    pub reply_count: i64,
    pub like_count: i64,
    pub pinned: bool,
    pub closed: bool,
    pub archived: bool,
    pub visible: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub bumped_at: Option<DateTime<Utc>>,
}
