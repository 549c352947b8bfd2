use std::sync::Arc;
use std::time::Duration;

use crate::config::BackfillSettings;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::fetch::{FetchOutcome, TopicFetcher};
use crate::models::{BackfillJob, BackfillStatus, BackfillStatusReport, Source};

use super::BackfillRunReport;

/// Walks each source's listing history a few pages per invocation.
///
/// There is no background loop here: callers invoke [`run_cycle`] as often as
/// they like. Progress is checkpointed after every page.
///
/// [`run_cycle`]: BackfillManager::run_cycle
pub struct BackfillManager {
    repository: Repository,
    fetcher: Arc<TopicFetcher>,
    owner: String,
    pages_per_run: u32,
    page_delay: Duration,
    claim_ttl: Duration,
}

#[derive(Default)]
struct Progress {
    pages: u32,
    topics: i64,
}

enum PageStep {
    Continue,
    Finished(BackfillStatus),
}

impl BackfillManager {
    pub fn new(
        repository: Repository,
        fetcher: Arc<TopicFetcher>,
        settings: &BackfillSettings,
        owner: String,
    ) -> Self {
        Self {
            repository,
            fetcher,
            owner,
            pages_per_run: settings.pages_per_run.max(1),
            page_delay: Duration::from_millis(settings.page_delay_ms),
            claim_ttl: Duration::from_secs(settings.claim_ttl_secs),
        }
    }

    pub async fn start_backfill(&self, source_id: &str) -> Result<BackfillJob> {
        if self.repository.get_source(source_id).await?.is_none() {
            return Err(AppError::SourceNotFound(source_id.to_string()));
        }
        let job = self.repository.create_or_reset_job(source_id).await?;
        tracing::info!(
            source = %source_id,
            job_id = job.id,
            status = %job.status,
            "Backfill requested"
        );
        Ok(job)
    }

    pub async fn init_for_all_sources(&self) -> Result<usize> {
        let created = self.repository.init_jobs_for_all_sources().await?;
        tracing::info!(created, "Initialized backfill jobs");
        Ok(created)
    }

    /// Process a bounded number of pages for the next selectable job.
    /// Returns `None` when there is nothing to do.
    pub async fn run_cycle(&self) -> Result<Option<BackfillRunReport>> {
        let Some(job) = self
            .repository
            .claim_next_job(&self.owner, self.claim_ttl)
            .await?
        else {
            tracing::debug!("No backfill job to run");
            return Ok(None);
        };

        let Some(source) = self.repository.get_source(&job.source_id).await? else {
            let error = format!("source '{}' no longer exists", job.source_id);
            self.repository.fail_job(job.id, error.clone()).await?;
            return Ok(Some(self.report(&job, 0, 0, Some(error)).await?));
        };

        tracing::info!(
            source = %source.id,
            job_id = job.id,
            page = job.current_page,
            "Backfill invocation started"
        );

        let mut progress = Progress::default();
        let outcome = match self.run_pages(&job, &source, &mut progress).await {
            Ok(error) => error,
            Err(e) => {
                // Storage trouble mid-page ends this job, not the invocation.
                let error = e.to_string();
                tracing::error!(
                    source = %source.id,
                    job_id = job.id,
                    error = %error,
                    "Backfill job failed"
                );
                self.repository.fail_job(job.id, error.clone()).await?;
                Some(error)
            }
        };

        // The job may have finished, failed or been paused; the claim only
        // matters while it is still running.
        if let Err(e) = self.repository.release_claim(job.id, &self.owner).await {
            tracing::warn!(job_id = job.id, error = %e, "Failed to release backfill claim");
        }

        let report = self
            .report(&job, progress.pages, progress.topics, outcome)
            .await?;
        tracing::info!(
            source = %report.source_id,
            job_id = report.job_id,
            status = %report.status,
            pages = report.pages_fetched,
            topics = report.topics_fetched,
            "Backfill invocation finished"
        );
        Ok(Some(report))
    }

    /// Fetch up to `pages_per_run` pages, checkpointing each one. Returns the
    /// fetch error that failed the job, if any.
    async fn run_pages(
        &self,
        job: &BackfillJob,
        source: &Source,
        progress: &mut Progress,
    ) -> Result<Option<String>> {
        let mut page = job.current_page;

        while progress.pages < self.pages_per_run {
            if progress.pages > 0 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }

            let request_page = u32::try_from(page)
                .map_err(|_| AppError::Config(format!("page cursor {} out of range", page)))?;
            let outcome = self.fetcher.fetch_page(source, request_page).await;
            progress.pages += 1;

            let step = match outcome {
                FetchOutcome::Failed(e) => {
                    let error = e.to_string();
                    tracing::error!(
                        source = %source.id,
                        page,
                        error = %error,
                        "Backfill page failed"
                    );
                    self.repository.fail_job(job.id, error.clone()).await?;
                    return Ok(Some(error));
                }
                FetchOutcome::Empty => {
                    self.repository.complete_job(job.id, page, 0).await?;
                    PageStep::Finished(BackfillStatus::Complete)
                }
                FetchOutcome::Topics { topics, has_more } => {
                    let added = self.repository.upsert_topics(topics).await? as i64;
                    progress.topics += added;
                    if !has_more {
                        self.repository.complete_job(job.id, page, added).await?;
                        PageStep::Finished(BackfillStatus::Complete)
                    } else if self
                        .repository
                        .record_page_progress(job.id, page + 1, added)
                        .await?
                    {
                        page += 1;
                        PageStep::Continue
                    } else {
                        tracing::info!(
                            source = %source.id,
                            job_id = job.id,
                            "Job left running state, stopping"
                        );
                        PageStep::Finished(BackfillStatus::Paused)
                    }
                }
            };

            if let PageStep::Finished(status) = step {
                tracing::debug!(source = %source.id, page, %status, "Backfill stopped");
                break;
            }
        }

        Ok(None)
    }

    async fn report(
        &self,
        job: &BackfillJob,
        pages_fetched: u32,
        topics_fetched: i64,
        error: Option<String>,
    ) -> Result<BackfillRunReport> {
        let current = self
            .repository
            .get_job(job.id)
            .await?
            .ok_or(AppError::JobNotFound(job.id))?;
        Ok(BackfillRunReport {
            job_id: current.id,
            source_id: current.source_id,
            pages_fetched,
            topics_fetched,
            status: current.status,
            current_page: current.current_page,
            error: error.or(current.error),
        })
    }

    /// Park a pending or running job. A running invocation stops after its
    /// current page.
    pub async fn pause_job(&self, job_id: i64) -> Result<BackfillJob> {
        let job = self.load_job(job_id).await?;
        self.transition(job, BackfillStatus::Paused, false).await
    }

    pub async fn resume_job(&self, job_id: i64) -> Result<BackfillJob> {
        let job = self.load_job(job_id).await?;
        if job.status != BackfillStatus::Paused {
            return Err(AppError::InvalidTransition {
                job_id,
                from: job.status,
                to: BackfillStatus::Pending,
            });
        }
        self.transition(job, BackfillStatus::Pending, true).await
    }

    pub async fn retry_job(&self, job_id: i64) -> Result<BackfillJob> {
        let job = self.load_job(job_id).await?;
        if job.status != BackfillStatus::Failed {
            return Err(AppError::InvalidTransition {
                job_id,
                from: job.status,
                to: BackfillStatus::Pending,
            });
        }
        self.transition(job, BackfillStatus::Pending, true).await
    }

    pub async fn status(&self) -> Result<BackfillStatusReport> {
        Ok(BackfillStatusReport {
            counts: self.repository.job_status_counts().await?,
            jobs: self.repository.list_jobs().await?,
        })
    }

    async fn load_job(&self, job_id: i64) -> Result<BackfillJob> {
        self.repository
            .get_job(job_id)
            .await?
            .ok_or(AppError::JobNotFound(job_id))
    }

    async fn transition(
        &self,
        job: BackfillJob,
        to: BackfillStatus,
        clear_error: bool,
    ) -> Result<BackfillJob> {
        let invalid = |from| AppError::InvalidTransition {
            job_id: job.id,
            from,
            to,
        };

        if !job.status.can_transition_to(to) {
            return Err(invalid(job.status));
        }
        if !self
            .repository
            .transition_job(job.id, job.status, to, clear_error)
            .await?
        {
            // Lost a race with a cycle or another operator.
            let current = self.load_job(job.id).await?;
            return Err(invalid(current.status));
        }

        tracing::info!(job_id = job.id, from = %job.status, %to, "Backfill job transitioned");
        self.load_job(job.id).await
    }
}
