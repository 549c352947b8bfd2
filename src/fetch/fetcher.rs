use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION, RETRY_AFTER};
use reqwest::{redirect, Client, StatusCode};
use tokio::sync::mpsc;

use crate::config::FetchSettings;
use crate::error::Result;
use crate::models::{Source, Topic};

use super::normalize::{normalize_page, ListingPage};
use super::{FetchError, FetchOutcome, RetryPolicy, SourceFetch};

/// Fetches listing pages from source forums.
///
/// Failures are classified into [`FetchError`] and returned inside
/// [`FetchOutcome::Failed`]; nothing here writes to a cache tier.
pub struct TopicFetcher {
    client: Client,
    retry: RetryPolicy,
    batch_size: usize,
    batch_delay: Duration,
}

impl TopicFetcher {
    pub fn new(settings: &FetchSettings, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .user_agent(settings.user_agent.as_str())
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            retry,
            batch_size: settings.batch_size.max(1),
            batch_delay: Duration::from_millis(settings.batch_delay_ms),
        })
    }

    /// Fetch one page of a source's listing, retrying per the policy.
    pub async fn fetch_page(&self, source: &Source, page: u32) -> FetchOutcome {
        match self.retry.run(move || self.try_fetch_page(source, page)).await {
            Ok((topics, _)) if topics.is_empty() => {
                tracing::debug!(source = %source.id, page, "Source returned no topics");
                FetchOutcome::Empty
            }
            Ok((topics, has_more)) => {
                tracing::debug!(
                    source = %source.id,
                    page,
                    count = topics.len(),
                    has_more,
                    "Fetched topics"
                );
                FetchOutcome::Topics { topics, has_more }
            }
            Err(e) => {
                tracing::warn!(source = %source.id, page, error = %e, "Fetch failed");
                FetchOutcome::Failed(e)
            }
        }
    }

    async fn try_fetch_page(
        &self,
        source: &Source,
        page: u32,
    ) -> std::result::Result<(Vec<Topic>, bool), FetchError> {
        let response = self
            .client
            .get(source.listing_url(page))
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::RateLimited { retry_after });
        }

        if status.is_redirection() {
            let location = headers
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string());
            return Err(FetchError::Moved {
                status: status.as_u16(),
                location,
            });
        }

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("json") {
            return Err(FetchError::NotJson { content_type });
        }

        let bytes = response.bytes().await?;
        let listing: ListingPage =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Malformed(e.to_string()))?;

        Ok(normalize_page(&source.id, listing))
    }

    /// Fetch page 0 of every source in bounded batches, pausing between
    /// batches. Each result is sent as soon as it resolves.
    pub async fn fetch_sources(&self, sources: Vec<Source>, results: mpsc::Sender<SourceFetch>) {
        for (i, batch) in sources.chunks(self.batch_size).enumerate() {
            if i > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }

            let mut in_flight = stream::iter(batch.to_vec())
                .map(|source| async move {
                    let outcome = self.fetch_page(&source, 0).await;
                    SourceFetch {
                        source,
                        page: 0,
                        outcome,
                    }
                })
                .buffer_unordered(self.batch_size);

            while let Some(result) = in_flight.next().await {
                if results.send(result).await.is_err() {
                    tracing::debug!("Fetch result receiver dropped, stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn fast_settings() -> FetchSettings {
        FetchSettings {
            batch_size: 3,
            batch_delay_ms: 0,
            request_timeout_secs: 5,
            connect_timeout_secs: 2,
            user_agent: "forum-ingest-test".into(),
        }
    }

    pub(crate) fn fetcher() -> TopicFetcher {
        TopicFetcher::new(&fast_settings(), RetryPolicy::none()).unwrap()
    }

    pub(crate) fn source_at(server: &MockServer, id: &str, prefix: &str) -> Source {
        Source {
            id: id.to_string(),
            url: format!("{}{}", server.uri(), prefix),
            name: id.to_string(),
            tier: 1,
        }
    }

    pub(crate) fn listing(ids: &[i64], more: bool) -> serde_json::Value {
        let topics: Vec<_> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "title": format!("t{}", id),
                    "slug": format!("t-{}", id),
                    "posts_count": 3,
                })
            })
            .collect();
        let mut list = json!({ "topics": topics });
        if more {
            list["more_topics_url"] = json!("/latest?page=next");
        }
        json!({ "topic_list": list })
    }

    /// A successful listing page with the given topic ids.
    pub(crate) fn ok_page(ids: &[i64], more: bool) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(listing(ids, more))
    }

    async fn fetch_all(fetcher: &TopicFetcher, sources: Vec<Source>) -> Vec<SourceFetch> {
        let (tx, mut rx) = mpsc::channel::<SourceFetch>(4);
        let collect = async {
            let mut out = Vec::new();
            while let Some(result) = rx.recv().await {
                out.push(result);
            }
            out
        };
        let ((), results) = tokio::join!(fetcher.fetch_sources(sources, tx), collect);
        results
    }

    pub(crate) async fn mount_page(
        server: &MockServer,
        prefix: &str,
        page: u32,
        response: ResponseTemplate,
    ) {
        Mock::given(method("GET"))
            .and(path(format!("{}/latest.json", prefix)))
            .and(query_param("page", page.to_string()))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn classifies_success_empty_and_errors() {
        let server = MockServer::start().await;
        mount_page(&server, "/ok", 0, ok_page(&[1, 2], true)).await;
        mount_page(&server, "/empty", 0, ok_page(&[], false)).await;
        let limited = ResponseTemplate::new(429).insert_header("retry-after", "30");
        mount_page(&server, "/limited", 0, limited).await;
        let html = ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html");
        mount_page(&server, "/html", 0, html).await;
        let moved =
            ResponseTemplate::new(301).insert_header("location", "https://elsewhere.example.org");
        mount_page(&server, "/moved", 0, moved).await;
        let broken = ResponseTemplate::new(200).set_body_raw("{not json", "application/json");
        mount_page(&server, "/broken", 0, broken).await;

        let f = fetcher();

        match f.fetch_page(&source_at(&server, "ok", "/ok"), 0).await {
            FetchOutcome::Topics { topics, has_more } => {
                assert_eq!(topics.len(), 2);
                assert!(has_more);
                assert_eq!(topics[0].source_id, "ok");
                assert_eq!(topics[0].reply_count, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert!(matches!(
            f.fetch_page(&source_at(&server, "empty", "/empty"), 0).await,
            FetchOutcome::Empty
        ));

        match f.fetch_page(&source_at(&server, "limited", "/limited"), 0).await {
            FetchOutcome::Failed(FetchError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert!(matches!(
            f.fetch_page(&source_at(&server, "html", "/html"), 0).await,
            FetchOutcome::Failed(FetchError::NotJson { .. })
        ));
        assert!(matches!(
            f.fetch_page(&source_at(&server, "moved", "/moved"), 0).await,
            FetchOutcome::Failed(FetchError::Moved { status: 301, .. })
        ));
        assert!(matches!(
            f.fetch_page(&source_at(&server, "broken", "/broken"), 0).await,
            FetchOutcome::Failed(FetchError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn connection_failure_is_contained() {
        let source = Source {
            id: "down".into(),
            url: "http://127.0.0.1:9".into(),
            name: "down".into(),
            tier: 1,
        };
        assert!(matches!(
            fetcher().fetch_page(&source, 0).await,
            FetchOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn one_failing_source_does_not_affect_the_batch() {
        let server = MockServer::start().await;
        mount_page(&server, "/a", 0, ok_page(&[1], false)).await;
        mount_page(&server, "/b", 0, ResponseTemplate::new(500)).await;
        mount_page(&server, "/c", 0, ok_page(&[5, 6], false)).await;
        mount_page(&server, "/d", 0, ok_page(&[9], false)).await;

        let sources = vec![
            source_at(&server, "a", "/a"),
            source_at(&server, "b", "/b"),
            source_at(&server, "c", "/c"),
            source_at(&server, "d", "/d"),
        ];
        let mut results = fetch_all(&fetcher(), sources).await;
        results.sort_by(|x, y| x.source.id.cmp(&y.source.id));

        assert_eq!(results.len(), 4);
        assert!(matches!(results[0].outcome, FetchOutcome::Topics { .. }));
        assert!(matches!(
            results[1].outcome,
            FetchOutcome::Failed(FetchError::Status { status: 500 })
        ));
        assert!(matches!(results[2].outcome, FetchOutcome::Topics { .. }));
        assert!(matches!(results[3].outcome, FetchOutcome::Topics { .. }));
    }

    #[tokio::test]
    async fn batches_are_bounded_and_spaced_by_the_batch_delay() {
        let server = MockServer::start().await;
        let ids = ["a", "b", "c", "d"];
        for id in ids {
            let slow = ok_page(&[1], false).set_delay(Duration::from_millis(100));
            mount_page(&server, &format!("/{}", id), 0, slow).await;
        }
        let sources = ids
            .iter()
            .map(|id| source_at(&server, id, &format!("/{}", id)))
            .collect();

        let settings = FetchSettings {
            batch_size: 2,
            batch_delay_ms: 200,
            ..fast_settings()
        };
        let f = TopicFetcher::new(&settings, RetryPolicy::none()).unwrap();

        let started = std::time::Instant::now();
        let results = fetch_all(&f, sources).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 4);
        // Two batches of two slow requests with one pause between them. A single
        // unbounded batch would finish in roughly one request's time.
        assert!(elapsed >= Duration::from_millis(400), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn retries_server_errors_before_succeeding() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky/latest.json"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_page(&server, "/flaky", 0, ok_page(&[1], false)).await;

        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            jitter: false,
        };
        let f = TopicFetcher::new(&fast_settings(), retry).unwrap();
        assert!(matches!(
            f.fetch_page(&source_at(&server, "flaky", "/flaky"), 0).await,
            FetchOutcome::Topics { .. }
        ));
    }
}
