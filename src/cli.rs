use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "forum-ingest")]
#[command(about = "Forum topic ingestion engine: tiered cache, scheduled refresh and backfill")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "FORUM_INGEST_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the refresh scheduler until Ctrl-C
    Serve,
    /// Run one refresh cycle now
    Refresh {
        /// Tier to refresh (repeatable; defaults to the configured tiers)
        #[arg(short, long = "tier")]
        tiers: Vec<u8>,
    },
    /// Print cached topics for the given sources
    Topics {
        #[arg(required = true)]
        sources: Vec<String>,
        /// Read stored topics instead of the cache
        #[arg(long)]
        stored: bool,
    },
    /// Print cache statistics
    Stats,
    /// Drop all cached snapshots (stored topics are kept)
    ClearCache,
    /// Manage backfill jobs
    #[command(subcommand)]
    Backfill(BackfillCommand),
}

#[derive(Subcommand)]
pub enum BackfillCommand {
    /// Create or restart the backfill job for a source
    Start { source: String },
    /// Process the next job's page budget
    Run {
        /// Number of invocations to run back to back
        #[arg(long, default_value_t = 1)]
        cycles: u32,
    },
    /// Create pending jobs for every source without one
    Init,
    /// Pause a pending or running job
    Pause { job_id: i64 },
    /// Move a paused job back to pending
    Resume { job_id: i64 },
    /// Move a failed job back to pending
    Retry { job_id: i64 },
    /// Show job counts and the job list
    Status,
}
