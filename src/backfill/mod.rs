mod manager;

use serde::Serialize;

use crate::models::BackfillStatus;

pub use manager::BackfillManager;

/// What one backfill invocation did to the job it claimed.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillRunReport {
    pub job_id: i64,
    pub source_id: String,
    pub pages_fetched: u32,
    pub topics_fetched: i64,
    pub status: BackfillStatus,
    pub current_page: i64,
    pub error: Option<String>,
}
