use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::{LeaseLock, TieredCache};
use crate::db::Repository;
use crate::fetch::{FetchOutcome, SourceFetch, TopicFetcher};

use super::{RefreshReport, SkipReason, SourceFailure, SourceSuccess};

pub const REFRESH_LOCK_KEY: &str = "forum-ingest:refresh-lock";

/// Clears the in-process refreshing flag when the cycle ends, however it ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl<'a> RefreshGuard<'a> {
    fn try_enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodically refreshes the cache for a prioritized set of sources.
///
/// At most one cycle runs per process (local flag) and, when Redis is
/// configured, per cluster (lease lock).
pub struct RefreshCoordinator {
    repository: Repository,
    fetcher: Arc<TopicFetcher>,
    cache: Arc<TieredCache>,
    lock: Arc<dyn LeaseLock>,
    lock_ttl: Duration,
    owner: String,
    refreshing: AtomicBool,
    last_refresh_start: RwLock<Option<DateTime<Utc>>>,
    last_report: RwLock<Option<RefreshReport>>,
}

impl RefreshCoordinator {
    pub fn new(
        repository: Repository,
        fetcher: Arc<TopicFetcher>,
        cache: Arc<TieredCache>,
        lock: Arc<dyn LeaseLock>,
        lock_ttl: Duration,
        owner: String,
    ) -> Self {
        Self {
            repository,
            fetcher,
            cache,
            lock,
            lock_ttl,
            owner,
            refreshing: AtomicBool::new(false),
            last_refresh_start: RwLock::new(None),
            last_report: RwLock::new(None),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    pub async fn last_refresh_start(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh_start.read().await
    }

    pub async fn last_report(&self) -> Option<RefreshReport> {
        self.last_report.read().await.clone()
    }

    /// Run one refresh cycle for the sources in `tiers`. Never fails: a cycle
    /// that cannot run is reported as skipped, and per-source errors are data.
    pub async fn run_cycle(&self, tiers: &[u8]) -> RefreshReport {
        let started_at = Utc::now();

        let Some(_guard) = RefreshGuard::try_enter(&self.refreshing) else {
            tracing::debug!("Refresh already running in this process, skipping");
            return RefreshReport::skipped(started_at, SkipReason::AlreadyRunning);
        };

        match self
            .lock
            .try_acquire(REFRESH_LOCK_KEY, &self.owner, self.lock_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("Refresh lock held by another instance, skipping cycle");
                return RefreshReport::skipped(started_at, SkipReason::LockHeld);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not acquire refresh lock, skipping cycle");
                return RefreshReport::skipped(started_at, SkipReason::LockHeld);
            }
        }

        *self.last_refresh_start.write().await = Some(started_at);
        tracing::info!(?tiers, "Refresh cycle started");

        let outcome = AssertUnwindSafe(self.refresh_sources(tiers, started_at))
            .catch_unwind()
            .await;

        if let Err(e) = self.lock.release(REFRESH_LOCK_KEY, &self.owner).await {
            tracing::warn!(error = %e, "Failed to release refresh lock; it will expire");
        }

        let report = outcome.unwrap_or_else(|_| {
            tracing::error!("Refresh cycle panicked");
            RefreshReport::aborted(started_at, "refresh cycle panicked".into())
        });

        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Refresh cycle finished"
        );
        *self.last_report.write().await = Some(report.clone());
        report
    }

    async fn refresh_sources(&self, tiers: &[u8], started_at: DateTime<Utc>) -> RefreshReport {
        let sources = match self.repository.get_sources_by_tiers(tiers.to_vec()).await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load sources for refresh");
                return RefreshReport::aborted(started_at, e.to_string());
            }
        };

        let (tx, mut rx) = mpsc::channel::<SourceFetch>(16);

        let apply = async {
            let mut succeeded = Vec::new();
            let mut failed = Vec::new();
            while let Some(result) = rx.recv().await {
                let source_id = result.source.id;
                match result.outcome {
                    FetchOutcome::Topics { topics, .. } => {
                        let count = topics.len();
                        self.cache.put(&source_id, topics).await;
                        succeeded.push(SourceSuccess { source_id, topics: count });
                    }
                    FetchOutcome::Empty => {
                        self.cache.put(&source_id, Vec::new()).await;
                        succeeded.push(SourceSuccess { source_id, topics: 0 });
                    }
                    FetchOutcome::Failed(e) => {
                        let error = e.to_string();
                        self.cache.record_failure(&source_id, error.clone());
                        failed.push(SourceFailure { source_id, error });
                    }
                }
            }
            (succeeded, failed)
        };

        let ((), (succeeded, failed)) =
            tokio::join!(self.fetcher.fetch_sources(sources, tx), apply);

        RefreshReport {
            started_at,
            finished_at: Utc::now(),
            skipped: None,
            error: None,
            succeeded,
            failed,
        }
    }

    /// Run a cycle immediately, then every `interval`, until `shutdown` flips.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        tiers: Vec<u8>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle(&tiers).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Refresh scheduler stopped");
        })
    }
}
