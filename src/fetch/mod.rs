mod fetcher;
pub mod normalize;
mod retry;

use std::time::Duration;

use thiserror::Error;

use crate::models::{Source, Topic};

pub use fetcher::TopicFetcher;
pub use retry::RetryPolicy;

#[cfg(test)]
pub(crate) use fetcher::tests as test_support;

/// Why fetching one page of one source failed. Reported as data, never raised
/// past the fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by upstream (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("moved (HTTP {status}){}", location.as_deref().map(|l| format!(" to {}", l)).unwrap_or_default())]
    Moved {
        status: u16,
        location: Option<String>,
    },

    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },

    #[error("expected JSON but got content-type '{content_type}'")]
    NotJson { content_type: String },

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout
            | FetchError::Connect(_)
            | FetchError::Transport(_)
            | FetchError::RateLimited { .. } => true,
            FetchError::Status { status } => *status == 408 || *status >= 500,
            FetchError::Moved { .. } | FetchError::NotJson { .. } | FetchError::Malformed(_) => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Topics { topics: Vec<Topic>, has_more: bool },
    Empty,
    Failed(FetchError),
}

/// Result of fetching one page of one source.
#[derive(Debug, Clone)]
pub struct SourceFetch {
    pub source: Source,
    pub page: u32,
    pub outcome: FetchOutcome,
}
