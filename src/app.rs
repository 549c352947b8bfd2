use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::backfill::{BackfillManager, BackfillRunReport};
use crate::cache::{
    create_pool, DistributedCache, LeaseLock, LocalLeaseLock, NoDistributedCache, RedisCache,
    RedisLeaseLock, TieredCache,
};
use crate::config::Config;
use crate::db::Repository;
use crate::error::Result;
use crate::fetch::{RetryPolicy, TopicFetcher};
use crate::models::{BackfillJob, BackfillStatusReport, CacheStats, Source, Topic};
use crate::refresh::{RefreshCoordinator, RefreshReport};

/// The ingestion engine: cache, refresh scheduler and backfill jobs behind one
/// handle. Holds no globals, so several engines can share a process.
pub struct App {
    config: Config,
    repository: Repository,
    cache: Arc<TieredCache>,
    refresh: Arc<RefreshCoordinator>,
    backfill: BackfillManager,

    // Scheduler state
    shutdown: watch::Sender<bool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        let repository = Repository::new(&config.db_path).await?;

        let sources: Vec<Source> = config.sources.iter().cloned().map(Source::from).collect();
        let seeded = repository.seed_sources(sources).await?;
        tracing::debug!(sources = seeded, "Seeded sources from config");

        let (distributed, lock) = connect_shared_tiers(&config);
        let fetcher = Arc::new(TopicFetcher::new(
            &config.fetch,
            RetryPolicy::from(config.retry.clone()),
        )?);
        let cache = Arc::new(TieredCache::new(
            repository.clone(),
            distributed,
            config.cache_ttl(),
        ));

        let owner = uuid::Uuid::new_v4().to_string();
        tracing::debug!(owner = %owner, "Engine instance id");

        let refresh = Arc::new(RefreshCoordinator::new(
            repository.clone(),
            fetcher.clone(),
            cache.clone(),
            lock,
            config.lock_ttl(),
            owner.clone(),
        ));
        let backfill = BackfillManager::new(repository.clone(), fetcher, &config.backfill, owner);

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            repository,
            cache,
            refresh,
            backfill,
            shutdown,
            scheduler: Mutex::new(None),
        })
    }

    /// Start the periodic refresh. The first cycle runs immediately.
    pub async fn start(&self) {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_some() {
            return;
        }
        self.shutdown.send_replace(false);
        let interval = self.config.cache_ttl();
        tracing::info!(
            interval_secs = interval.as_secs(),
            tiers = ?self.config.refresh_tiers,
            "Starting refresh scheduler"
        );
        *scheduler = Some(self.refresh.clone().spawn(
            interval,
            self.config.refresh_tiers.clone(),
            self.shutdown.subscribe(),
        ));
    }

    /// Stop the scheduler and wait for an in-flight cycle to finish.
    pub async fn stop(&self) {
        let Some(handle) = self.scheduler.lock().await.take() else {
            return;
        };
        self.shutdown.send_replace(true);
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Refresh scheduler task failed");
        }
    }

    // Read API

    pub async fn get_cached_topics(&self, source_ids: &[String]) -> Vec<Topic> {
        self.cache.cached_topics(source_ids).await
    }

    /// Durable topic rows for the given sources, bypassing the cache tiers.
    pub async fn get_stored_topics(&self, source_ids: &[String]) -> Result<Vec<Topic>> {
        let mut topics = Vec::new();
        for source_id in source_ids {
            topics.extend(self.repository.get_topics_for_source(source_id).await?);
        }
        Ok(topics)
    }

    pub async fn get_cache_stats(&self) -> CacheStats {
        CacheStats {
            size: self.cache.len(),
            is_refreshing: self.refresh.is_refreshing(),
            last_refresh_start: self.refresh.last_refresh_start().await,
            distributed: self.cache.is_distributed(),
        }
    }

    pub async fn last_refresh_report(&self) -> Option<RefreshReport> {
        self.refresh.last_report().await
    }

    // Control API

    /// Run a refresh cycle now for `tiers`, or the configured tiers if empty.
    pub async fn refresh_now(&self, tiers: &[u8]) -> RefreshReport {
        if tiers.is_empty() {
            self.refresh.run_cycle(&self.config.refresh_tiers).await
        } else {
            self.refresh.run_cycle(tiers).await
        }
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear().await?;
        tracing::info!("Cache cleared");
        Ok(())
    }

    pub async fn start_backfill(&self, source_id: &str) -> Result<BackfillJob> {
        self.backfill.start_backfill(source_id).await
    }

    pub async fn run_backfill_cycle(&self) -> Result<Option<BackfillRunReport>> {
        self.backfill.run_cycle().await
    }

    pub async fn init_backfill_for_all_sources(&self) -> Result<usize> {
        self.backfill.init_for_all_sources().await
    }

    pub async fn pause_job(&self, job_id: i64) -> Result<BackfillJob> {
        self.backfill.pause_job(job_id).await
    }

    pub async fn resume_job(&self, job_id: i64) -> Result<BackfillJob> {
        self.backfill.resume_job(job_id).await
    }

    pub async fn retry_job(&self, job_id: i64) -> Result<BackfillJob> {
        self.backfill.retry_job(job_id).await
    }

    pub async fn get_backfill_status(&self) -> Result<BackfillStatusReport> {
        self.backfill.status().await
    }
}

/// Redis-backed cache and lock when configured and the pool can be built;
/// memory-only otherwise.
fn connect_shared_tiers(config: &Config) -> (Arc<dyn DistributedCache>, Arc<dyn LeaseLock>) {
    let Some(url) = config.redis_url.as_deref() else {
        tracing::info!("No Redis configured, using memory-only cache");
        return (Arc::new(NoDistributedCache), Arc::new(LocalLeaseLock::new()));
    };

    let timeout = Duration::from_millis(config.redis_timeout_ms);
    match create_pool(url, config.redis_pool_size, timeout) {
        Ok(pool) => {
            tracing::info!("Using Redis for distributed cache and refresh lock");
            (
                Arc::new(RedisCache::new(pool.clone())),
                Arc::new(RedisLeaseLock::new(pool)),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, falling back to memory-only cache");
            (Arc::new(NoDistributedCache), Arc::new(LocalLeaseLock::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackfillSettings, FetchSettings, RetrySettings};
    use crate::db::test_support::count_topics;
    use crate::fetch::test_support::{mount_page, ok_page};
    use crate::models::{BackfillStatus, SourceConfig};
    use tempfile::TempDir;
    use wiremock::{MockServer, ResponseTemplate};

    fn source_config(server: &MockServer, id: &str, tier: u8) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            url: format!("{}/{}", server.uri(), id),
            name: id.to_uppercase(),
            tier,
        }
    }

    async fn test_app(server: &MockServer, sources: Vec<SourceConfig>) -> (TempDir, App) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            db_path: dir.path().join("engine.db").to_string_lossy().to_string(),
            sources,
            fetch: FetchSettings {
                batch_delay_ms: 0,
                ..FetchSettings::default()
            },
            retry: RetrySettings {
                max_attempts: 1,
                ..RetrySettings::default()
            },
            backfill: BackfillSettings {
                page_delay_ms: 0,
                ..BackfillSettings::default()
            },
            ..Config::default()
        };
        let app = App::new(config).await.unwrap();
        (dir, app)
    }

    #[tokio::test]
    async fn refresh_fills_cache_and_reports_stats() {
        let server = MockServer::start().await;
        let (_dir, app) = test_app(
            &server,
            vec![
                source_config(&server, "gov", 1),
                source_config(&server, "dev", 2),
                source_config(&server, "misc", 3),
            ],
        )
        .await;
        mount_page(&server, "/gov", 0, ok_page(&[1, 2], true)).await;
        mount_page(&server, "/dev", 0, ResponseTemplate::new(503)).await;

        let stats = app.get_cache_stats().await;
        assert_eq!(stats.size, 0);
        assert!(stats.last_refresh_start.is_none());
        assert!(!stats.distributed);

        let report = app.refresh_now(&[]).await;
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.failed.len(), 1);

        let topics = app
            .get_cached_topics(&["gov".into(), "dev".into(), "misc".into()])
            .await;
        assert_eq!(topics.len(), 2);
        assert_eq!(count_topics(&app.repository, "gov").await, 2);

        let stats = app.get_cache_stats().await;
        assert!(stats.last_refresh_start.is_some());
        assert!(!stats.is_refreshing);
        assert!(app.last_refresh_report().await.is_some());

        app.clear_cache().await.unwrap();
        assert!(app.get_cached_topics(&["gov".into()]).await.is_empty());
        assert_eq!(app.get_stored_topics(&["gov".into()]).await.unwrap().len(), 2);
        assert_eq!(count_topics(&app.repository, "gov").await, 2);
    }

    #[tokio::test]
    async fn backfill_controls_drive_jobs() {
        let server = MockServer::start().await;
        let (_dir, app) = test_app(
            &server,
            vec![source_config(&server, "gov", 1), source_config(&server, "dev", 2)],
        )
        .await;
        mount_page(&server, "/gov", 0, ok_page(&[1, 2], false)).await;

        assert_eq!(app.init_backfill_for_all_sources().await.unwrap(), 2);
        let status = app.get_backfill_status().await.unwrap();
        assert_eq!(status.counts.pending, 2);

        let dev = status.jobs.iter().find(|j| j.source_id == "dev").unwrap().id;
        app.pause_job(dev).await.unwrap();

        let report = app.run_backfill_cycle().await.unwrap().unwrap();
        assert_eq!(report.source_id, "gov");
        assert_eq!(report.status, BackfillStatus::Complete);
        assert!(app.run_backfill_cycle().await.unwrap().is_none());

        let resumed = app.resume_job(dev).await.unwrap();
        assert_eq!(resumed.status, BackfillStatus::Pending);

        let status = app.get_backfill_status().await.unwrap();
        assert_eq!(status.counts.complete, 1);
        assert_eq!(status.counts.pending, 1);

        assert!(app.start_backfill("gov").await.is_ok());
        assert!(app.retry_job(dev).await.is_err());
    }

    #[tokio::test]
    async fn scheduler_starts_and_stops() {
        let server = MockServer::start().await;
        let (_dir, app) = test_app(&server, vec![source_config(&server, "gov", 1)]).await;
        mount_page(&server, "/gov", 0, ok_page(&[1], false)).await;

        app.start().await;
        // A second start is a no-op.
        app.start().await;

        for _ in 0..100 {
            if app.last_refresh_report().await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(app.get_cached_topics(&["gov".into()]).await.len(), 1);

        app.stop().await;
        app.stop().await;
    }
}
