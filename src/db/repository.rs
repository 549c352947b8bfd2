use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{BackfillJob, BackfillStatus, Source, StatusCounts, Topic};

use super::schema::SCHEMA;

const JOB_COLUMNS: &str = "id, source_id, status, current_page, topics_fetched, total_pages, \
                           last_run_at, error, created_at, updated_at";

const TOPIC_COLUMNS: &str = "source_id, external_id, title, slug, tags, posts_count, views, \
                             reply_count, like_count, pinned, closed, archived, visible, \
                             created_at, bumped_at";

#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Source operations

    /// Insert or refresh the configured sources. Returns the number written.
    pub async fn seed_sources(&self, sources: Vec<Source>) -> Result<usize> {
        let written = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT INTO sources (id, url, name, tier) VALUES (?1, ?2, ?3, ?4)
                           ON CONFLICT(id) DO UPDATE SET
                               url = excluded.url,
                               name = excluded.name,
                               tier = excluded.tier"#,
                    )?;
                    for source in &sources {
                        stmt.execute(params![source.id, source.url, source.name, source.tier])?;
                    }
                }
                tx.commit()?;
                Ok(sources.len())
            })
            .await?;
        Ok(written)
    }

    pub async fn get_sources(&self) -> Result<Vec<Source>> {
        let sources = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, url, name, tier FROM sources ORDER BY tier, id")?;
                let sources = stmt
                    .query_map([], source_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(sources)
            })
            .await?;
        Ok(sources)
    }

    pub async fn get_sources_by_tiers(&self, tiers: Vec<u8>) -> Result<Vec<Source>> {
        let sources = self.get_sources().await?;
        Ok(sources
            .into_iter()
            .filter(|s| tiers.contains(&s.tier))
            .collect())
    }

    pub async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let id = id.to_string();
        let source = self
            .conn
            .call(move |conn| {
                let source = conn
                    .query_row(
                        "SELECT id, url, name, tier FROM sources WHERE id = ?1",
                        params![id],
                        source_from_row,
                    )
                    .optional()?;
                Ok(source)
            })
            .await?;
        Ok(source)
    }

    // Topic operations

    /// Upsert a page of topics in one transaction. `created_at` is kept from
    /// the first write; everything else takes the latest values.
    pub async fn upsert_topics(&self, topics: Vec<Topic>) -> Result<usize> {
        if topics.is_empty() {
            return Ok(0);
        }

        let rows = topics
            .into_iter()
            .map(|t| serde_json::to_string(&t.tags).map(|tags| (t, tags)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let written = self
            .conn
            .call(move |conn| {
                let now = now_str();
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT INTO topics (source_id, external_id, title, slug, tags, posts_count,
                                               views, reply_count, like_count, pinned, closed, archived,
                                               visible, created_at, bumped_at, first_seen_at, updated_at)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
                           ON CONFLICT(source_id, external_id) DO UPDATE SET
                               title = excluded.title,
                               slug = excluded.slug,
                               tags = excluded.tags,
                               posts_count = excluded.posts_count,
                               views = excluded.views,
                               reply_count = excluded.reply_count,
                               like_count = excluded.like_count,
                               pinned = excluded.pinned,
                               closed = excluded.closed,
                               archived = excluded.archived,
                               visible = excluded.visible,
                               created_at = COALESCE(topics.created_at, excluded.created_at),
                               bumped_at = excluded.bumped_at,
                               updated_at = excluded.updated_at"#,
                    )?;
                    for (topic, tags) in &rows {
                        stmt.execute(params![
                            topic.source_id,
                            topic.external_id,
                            topic.title,
                            topic.slug,
                            tags,
                            topic.posts_count,
                            topic.views,
                            topic.reply_count,
                            topic.like_count,
                            topic.pinned,
                            topic.closed,
                            topic.archived,
                            topic.visible,
                            topic.created_at.map(format_ts),
                            topic.bumped_at.map(format_ts),
                            now,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await?;
        Ok(written)
    }

    pub async fn get_topics_for_source(&self, source_id: &str) -> Result<Vec<Topic>> {
        let source_id = source_id.to_string();
        let topics = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM topics WHERE source_id = ?1 \
                     ORDER BY bumped_at DESC NULLS LAST, external_id DESC",
                    TOPIC_COLUMNS
                ))?;
                let topics = stmt
                    .query_map(params![source_id], topic_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(topics)
            })
            .await?;
        Ok(topics)
    }

    // Backfill job operations

    /// Create a pending job for the source. A finished (`complete`/`failed`)
    /// job is restarted from page 0; an active or paused job is left alone.
    pub async fn create_or_reset_job(&self, source_id: &str) -> Result<BackfillJob> {
        let source_id = source_id.to_string();
        let job = self
            .conn
            .call(move |conn| {
                let now = now_str();
                conn.execute(
                    r#"INSERT INTO backfill_jobs (source_id, status, created_at, updated_at)
                       VALUES (?1, 'pending', ?2, ?2)
                       ON CONFLICT(source_id) DO UPDATE SET
                           status = 'pending',
                           current_page = 0,
                           topics_fetched = 0,
                           total_pages = NULL,
                           error = NULL,
                           claimed_by = NULL,
                           claim_expires_at = NULL,
                           updated_at = excluded.updated_at
                       WHERE backfill_jobs.status IN ('complete', 'failed')"#,
                    params![source_id, now],
                )?;
                let job = conn.query_row(
                    &format!("SELECT {} FROM backfill_jobs WHERE source_id = ?1", JOB_COLUMNS),
                    params![source_id],
                    job_from_row,
                )?;
                Ok(job)
            })
            .await?;
        Ok(job)
    }

    /// Create pending jobs for every source that has none. Returns how many were created.
    pub async fn init_jobs_for_all_sources(&self) -> Result<usize> {
        let created = self
            .conn
            .call(|conn| {
                let now = now_str();
                let created = conn.execute(
                    r#"INSERT INTO backfill_jobs (source_id, status, created_at, updated_at)
                       SELECT id, 'pending', ?1, ?1 FROM sources
                       WHERE id NOT IN (SELECT source_id FROM backfill_jobs)
                       ORDER BY tier, id"#,
                    params![now],
                )?;
                Ok(created)
            })
            .await?;
        Ok(created)
    }

    /// Atomically pick the next job and mark it `running` under `owner`'s claim.
    ///
    /// The least recently updated `running` job wins over the oldest `pending`
    /// one. Jobs claimed by another owner are skipped until the claim expires.
    pub async fn claim_next_job(
        &self,
        owner: &str,
        claim_ttl: Duration,
    ) -> Result<Option<BackfillJob>> {
        let owner = owner.to_string();
        let job = self
            .conn
            .call(move |conn| {
                let now = Utc::now();
                let expires = now + chrono::Duration::from_std(claim_ttl).unwrap_or_default();
                let job = conn
                    .query_row(
                        &format!(
                            r#"UPDATE backfill_jobs
                               SET status = 'running',
                                   last_run_at = ?1,
                                   updated_at = ?1,
                                   claimed_by = ?2,
                                   claim_expires_at = ?3
                               WHERE id = (
                                   SELECT id FROM backfill_jobs
                                   WHERE status IN ('running', 'pending')
                                     AND (claimed_by IS NULL OR claimed_by = ?2 OR claim_expires_at < ?1)
                                   ORDER BY CASE status WHEN 'running' THEN 0 ELSE 1 END,
                                            CASE status WHEN 'running' THEN updated_at ELSE created_at END,
                                            id
                                   LIMIT 1
                               )
                               RETURNING {}"#,
                            JOB_COLUMNS
                        ),
                        params![format_ts(now), owner, format_ts(expires)],
                        job_from_row,
                    )
                    .optional()?;
                Ok(job)
            })
            .await?;
        Ok(job)
    }

    /// Checkpoint one fetched page. Returns false if the job is no longer
    /// `running` (paused by an operator mid-invocation).
    pub async fn record_page_progress(
        &self,
        job_id: i64,
        next_page: i64,
        topics_added: i64,
    ) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE backfill_jobs
                       SET current_page = ?2,
                           topics_fetched = topics_fetched + ?3,
                           updated_at = ?4
                       WHERE id = ?1 AND status = 'running'"#,
                    params![job_id, next_page, topics_added, now_str()],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    pub async fn complete_job(
        &self,
        job_id: i64,
        stop_page: i64,
        topics_added: i64,
    ) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE backfill_jobs
                       SET status = 'complete',
                           current_page = ?2,
                           total_pages = ?2,
                           topics_fetched = topics_fetched + ?3,
                           error = NULL,
                           claimed_by = NULL,
                           claim_expires_at = NULL,
                           updated_at = ?4
                       WHERE id = ?1 AND status = 'running'"#,
                    params![job_id, stop_page, topics_added, now_str()],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    pub async fn fail_job(&self, job_id: i64, error: String) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE backfill_jobs
                       SET status = 'failed',
                           error = ?2,
                           claimed_by = NULL,
                           claim_expires_at = NULL,
                           updated_at = ?3
                       WHERE id = ?1 AND status = 'running'"#,
                    params![job_id, error, now_str()],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    pub async fn release_claim(&self, job_id: i64, owner: &str) -> Result<()> {
        let owner = owner.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE backfill_jobs SET claimed_by = NULL, claim_expires_at = NULL
                       WHERE id = ?1 AND claimed_by = ?2"#,
                    params![job_id, owner],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Compare-and-set a job's status. Returns false if the job was not in `from`.
    pub async fn transition_job(
        &self,
        job_id: i64,
        from: BackfillStatus,
        to: BackfillStatus,
        clear_error: bool,
    ) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE backfill_jobs
                       SET status = ?3,
                           error = CASE WHEN ?4 THEN NULL ELSE error END,
                           claimed_by = NULL,
                           claim_expires_at = NULL,
                           updated_at = ?5
                       WHERE id = ?1 AND status = ?2"#,
                    params![job_id, from.as_str(), to.as_str(), clear_error, now_str()],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<BackfillJob>> {
        let job = self
            .conn
            .call(move |conn| {
                let job = conn
                    .query_row(
                        &format!("SELECT {} FROM backfill_jobs WHERE id = ?1", JOB_COLUMNS),
                        params![job_id],
                        job_from_row,
                    )
                    .optional()?;
                Ok(job)
            })
            .await?;
        Ok(job)
    }

    pub async fn list_jobs(&self) -> Result<Vec<BackfillJob>> {
        let jobs = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM backfill_jobs ORDER BY created_at, id",
                    JOB_COLUMNS
                ))?;
                let jobs = stmt
                    .query_map([], job_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(jobs)
            })
            .await?;
        Ok(jobs)
    }

    pub async fn job_status_counts(&self) -> Result<StatusCounts> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare("SELECT status, COUNT(*) FROM backfill_jobs GROUP BY status")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((status_from_column(row, 0)?, row.get::<_, i64>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            counts.add(status, n);
        }
        Ok(counts)
    }
}

fn now_str() -> String {
    format_ts(Utc::now())
}

/// Fixed-width UTC timestamps so TEXT comparison orders chronologically.
fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56.000000Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn opt_datetime(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

fn status_from_column(row: &Row, idx: usize) -> rusqlite::Result<BackfillStatus> {
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn source_from_row(row: &Row) -> rusqlite::Result<Source> {
    Ok(Source {
        id: row.get(0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        tier: row.get(3)?,
    })
}

fn topic_from_row(row: &Row) -> rusqlite::Result<Topic> {
    let tags: String = row.get(4)?;
    let tags = serde_json::from_str(&tags)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?;
    Ok(Topic {
        source_id: row.get(0)?,
        external_id: row.get(1)?,
        title: row.get(2)?,
        slug: row.get(3)?,
        tags,
        posts_count: row.get(5)?,
        views: row.get(6)?,
        reply_count: row.get(7)?,
        like_count: row.get(8)?,
        pinned: row.get(9)?,
        closed: row.get(10)?,
        archived: row.get(11)?,
        visible: row.get(12)?,
        created_at: opt_datetime(row, 13)?,
        bumped_at: opt_datetime(row, 14)?,
    })
}

fn job_from_row(row: &Row) -> rusqlite::Result<BackfillJob> {
    Ok(BackfillJob {
        id: row.get(0)?,
        source_id: row.get(1)?,
        status: status_from_column(row, 2)?,
        current_page: row.get(3)?,
        topics_fetched: row.get(4)?,
        total_pages: row.get(5)?,
        last_run_at: opt_datetime(row, 6)?,
        error: row.get(7)?,
        created_at: opt_datetime(row, 8)?.unwrap_or_else(Utc::now),
        updated_at: opt_datetime(row, 9)?.unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    pub(crate) async fn temp_repository() -> (TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        (dir, repo)
    }

    pub(crate) fn source(id: &str, tier: u8) -> Source {
        Source {
            id: id.to_string(),
            url: format!("https://{}.example.org", id),
            name: id.to_uppercase(),
            tier,
        }
    }

    pub(crate) fn topic(source_id: &str, external_id: i64, posts: i64) -> Topic {
        Topic {
            source_id: source_id.to_string(),
            external_id,
            title: format!("Topic {}", external_id),
            slug: format!("topic-{}", external_id),
            tags: vec!["governance".into()],
            posts_count: posts,
            views: posts * 10,
            reply_count: (posts - 1).max(0),
            like_count: 0,
            pinned: false,
            closed: false,
            archived: false,
            visible: true,
            created_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            bumped_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()),
        }
    }

    pub(crate) async fn count_topics(repo: &Repository, source_id: &str) -> i64 {
        let source_id = source_id.to_string();
        repo.conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM topics WHERE source_id = ?1",
                    params![source_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .unwrap()
    }

    /// Make every topic insert fail with `message`.
    pub(crate) async fn reject_topic_writes(repo: &Repository, message: &str) {
        let sql = format!(
            "CREATE TRIGGER reject_topics BEFORE INSERT ON topics \
             BEGIN SELECT RAISE(ABORT, '{}'); END;",
            message
        );
        repo.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn seeding_overwrites_source_metadata() {
        let (_dir, repo) = temp_repository().await;
        repo.seed_sources(vec![source("a", 1), source("b", 2)])
            .await
            .unwrap();

        let mut renamed = source("a", 3);
        renamed.name = "Renamed".into();
        repo.seed_sources(vec![renamed]).await.unwrap();

        let a = repo.get_source("a").await.unwrap().unwrap();
        assert_eq!(a.name, "Renamed");
        assert_eq!(a.tier, 3);
        assert_eq!(repo.get_sources().await.unwrap().len(), 2);

        let tier2 = repo.get_sources_by_tiers(vec![2]).await.unwrap();
        assert_eq!(tier2, vec![source("b", 2)]);
    }

    #[tokio::test]
    async fn upsert_keeps_first_created_at_and_latest_counts() {
        let (_dir, repo) = temp_repository().await;
        repo.seed_sources(vec![source("a", 1)]).await.unwrap();

        let first = topic("a", 7, 3);
        repo.upsert_topics(vec![first.clone()]).await.unwrap();

        let mut second = topic("a", 7, 9);
        second.created_at = Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
        second.closed = true;
        second.tags = vec!["vote".into()];
        repo.upsert_topics(vec![second]).await.unwrap();

        let stored = repo.get_topics_for_source("a").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].created_at, first.created_at);
        assert_eq!(stored[0].posts_count, 9);
        assert_eq!(stored[0].reply_count, 8);
        assert!(stored[0].closed);
        assert_eq!(stored[0].tags, vec!["vote".to_string()]);
    }

    #[tokio::test]
    async fn corrupt_tags_column_is_an_error() {
        let (_dir, repo) = temp_repository().await;
        repo.seed_sources(vec![source("a", 1)]).await.unwrap();
        repo.upsert_topics(vec![topic("a", 1, 2)]).await.unwrap();

        repo.conn
            .call(|conn| {
                conn.execute("UPDATE topics SET tags = 'not json'", [])?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(repo.get_topics_for_source("a").await.is_err());
    }

    #[tokio::test]
    async fn one_job_row_per_source() {
        let (_dir, repo) = temp_repository().await;
        repo.seed_sources(vec![source("a", 1), source("b", 1)])
            .await
            .unwrap();

        let job = repo.create_or_reset_job("a").await.unwrap();
        let again = repo.create_or_reset_job("a").await.unwrap();
        assert_eq!(job.id, again.id);
        assert_eq!(again.status, BackfillStatus::Pending);

        assert_eq!(repo.init_jobs_for_all_sources().await.unwrap(), 1);
        assert_eq!(repo.init_jobs_for_all_sources().await.unwrap(), 0);
        assert_eq!(repo.list_jobs().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn claim_prefers_running_over_pending() {
        let (_dir, repo) = temp_repository().await;
        repo.seed_sources(vec![source("a", 1), source("b", 1)])
            .await
            .unwrap();
        let a = repo.create_or_reset_job("a").await.unwrap();
        let b = repo.create_or_reset_job("b").await.unwrap();

        // b becomes running and is released mid-way.
        repo.transition_job(b.id, BackfillStatus::Pending, BackfillStatus::Running, false)
            .await
            .unwrap();

        let claimed = repo
            .claim_next_job("worker-1", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, b.id);
        assert_eq!(claimed.status, BackfillStatus::Running);
        assert!(claimed.last_run_at.is_some());

        // While b is claimed, another owner gets the pending job instead.
        let other = repo
            .claim_next_job("worker-2", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(other.id, a.id);

        // Nothing left for a third owner.
        assert!(repo
            .claim_next_job("worker-3", Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn progress_is_ignored_once_paused() {
        let (_dir, repo) = temp_repository().await;
        repo.seed_sources(vec![source("a", 1)]).await.unwrap();
        repo.create_or_reset_job("a").await.unwrap();
        let job = repo
            .claim_next_job("w", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        assert!(repo.record_page_progress(job.id, 1, 30).await.unwrap());
        repo.transition_job(job.id, BackfillStatus::Running, BackfillStatus::Paused, false)
            .await
            .unwrap();
        assert!(!repo.record_page_progress(job.id, 2, 30).await.unwrap());

        let stored = repo.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BackfillStatus::Paused);
        assert_eq!(stored.current_page, 1);
        assert_eq!(stored.topics_fetched, 30);
    }

    #[tokio::test]
    async fn status_counts_group_jobs() {
        let (_dir, repo) = temp_repository().await;
        repo.seed_sources(vec![source("a", 1), source("b", 1), source("c", 2)])
            .await
            .unwrap();
        repo.init_jobs_for_all_sources().await.unwrap();
        let job = repo
            .claim_next_job("w", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        repo.fail_job(job.id, "boom".into()).await.unwrap();

        let counts = repo.job_status_counts().await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 3);
    }
}
