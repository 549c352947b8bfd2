mod coordinator;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use coordinator::{RefreshCoordinator, REFRESH_LOCK_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another instance holds the cluster-wide lease.
    LockHeld,
    /// A cycle is already in flight in this process.
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSuccess {
    pub source_id: String,
    pub topics: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: String,
}

/// Run-level metadata of one refresh cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub skipped: Option<SkipReason>,
    pub error: Option<String>,
    pub succeeded: Vec<SourceSuccess>,
    pub failed: Vec<SourceFailure>,
}

impl RefreshReport {
    pub(crate) fn skipped(started_at: DateTime<Utc>, reason: SkipReason) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            skipped: Some(reason),
            error: None,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub(crate) fn aborted(started_at: DateTime<Utc>, error: String) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            skipped: None,
            error: Some(error),
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}
