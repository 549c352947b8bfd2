mod backfill;
mod cache;
mod source;
mod topic;

pub use backfill::{BackfillJob, BackfillStatus, BackfillStatusReport, StatusCounts};
pub use cache::{CacheEntry, CacheStats};
pub use source::{Source, SourceConfig};
pub use topic::Topic;
