//! Wire shapes of a forum listing page and their conversion into [`Topic`]s.
//!
//! Everything that tolerates loose upstream payloads lives here; code past
//! this module only sees flat, validated values.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::Topic;

#[derive(Debug, Deserialize)]
pub struct ListingPage {
    #[serde(default)]
    pub topic_list: Option<TopicList>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TopicList {
    #[serde(default)]
    pub topics: Vec<RawTopic>,
    #[serde(default)]
    pub more_topics_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawTopic {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub tags: Option<Vec<RawTag>>,
    #[serde(default)]
    pub posts_count: Option<i64>,
    #[serde(default)]
    pub views: Option<i64>,
    #[serde(default)]
    pub reply_count: Option<i64>,
    #[serde(default)]
    pub like_count: Option<i64>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub bumped_at: Option<String>,
    #[serde(default)]
    pub last_posted_at: Option<String>,
}

/// Tags arrive either as bare names or as objects carrying a `name`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawTag {
    Name(String),
    Object {
        #[serde(default)]
        name: Option<String>,
    },
    Other(serde_json::Value),
}

/// Flatten mixed tag payloads into trimmed, non-empty names.
pub fn normalize_tags(tags: Vec<RawTag>) -> Vec<String> {
    tags.into_iter()
        .filter_map(|tag| match tag {
            RawTag::Name(name) => Some(name),
            RawTag::Object { name } => name,
            RawTag::Other(_) => None,
        })
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// The first post is the topic itself, so replies are posts minus one.
pub fn derive_reply_count(posts_count: i64) -> i64 {
    (posts_count - 1).max(0)
}

fn parse_timestamp(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn normalize_topic(source_id: &str, raw: RawTopic) -> Topic {
    let posts_count = raw.posts_count.unwrap_or(0).max(0);
    let reply_count = raw
        .reply_count
        .unwrap_or_else(|| derive_reply_count(posts_count));

    Topic {
        source_id: source_id.to_string(),
        external_id: raw.id,
        title: raw.title,
        slug: raw.slug,
        tags: normalize_tags(raw.tags.unwrap_or_default()),
        posts_count,
        views: raw.views.unwrap_or(0),
        reply_count,
        like_count: raw.like_count.unwrap_or(0),
        pinned: raw.pinned,
        closed: raw.closed,
        archived: raw.archived,
        visible: raw.visible.unwrap_or(true),
        created_at: parse_timestamp(raw.created_at.as_deref()),
        bumped_at: parse_timestamp(raw.bumped_at.as_deref().or(raw.last_posted_at.as_deref())),
    }
}

/// Normalize a whole page. Returns the topics and whether more pages exist.
pub fn normalize_page(source_id: &str, page: ListingPage) -> (Vec<Topic>, bool) {
    let list = page.topic_list.unwrap_or_default();
    let has_more = list
        .more_topics_url
        .as_deref()
        .is_some_and(|url| !url.trim().is_empty());
    let topics = list
        .topics
        .into_iter()
        .map(|raw| normalize_topic(source_id, raw))
        .collect();
    (topics, has_more)
}
