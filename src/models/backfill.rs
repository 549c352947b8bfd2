use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackfillStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Paused,
}

impl BackfillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillStatus::Pending => "pending",
            BackfillStatus::Running => "running",
            BackfillStatus::Complete => "complete",
            BackfillStatus::Failed => "failed",
            BackfillStatus::Paused => "paused",
        }
    }

    /// Allowed state machine edges. `Complete -> Pending` is only taken by an
    /// explicit restart of the source's backfill.
    pub fn can_transition_to(&self, next: BackfillStatus) -> bool {
        use BackfillStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Paused)
                | (Running, Complete)
                | (Running, Failed)
                | (Running, Paused)
                | (Paused, Pending)
                | (Failed, Pending)
                | (Complete, Pending)
        )
    }
}

impl fmt::Display for BackfillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackfillStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BackfillStatus::Pending),
            "running" => Ok(BackfillStatus::Running),
            "complete" => Ok(BackfillStatus::Complete),
            "failed" => Ok(BackfillStatus::Failed),
            "paused" => Ok(BackfillStatus::Paused),
            other => Err(format!("unknown backfill status '{}'", other)),
        }
    }
}

/// Persistent per-source backfill progress. `current_page` and
/// `topics_fetched` are checkpoints written after every page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillJob {
    pub id: i64,
    pub source_id: String,
    pub status: BackfillStatus,
    pub current_page: i64,
    pub topics_fetched: i64,
    pub total_pages: Option<i64>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub running: i64,
    pub complete: i64,
    pub failed: i64,
    pub paused: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: BackfillStatus, n: i64) {
        match status {
            BackfillStatus::Pending => self.pending += n,
            BackfillStatus::Running => self.running += n,
            BackfillStatus::Complete => self.complete += n,
            BackfillStatus::Failed => self.failed += n,
            BackfillStatus::Paused => self.paused += n,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.running + self.complete + self.failed + self.paused
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillStatusReport {
    pub counts: StatusCounts,
    pub jobs: Vec<BackfillJob>,
}
