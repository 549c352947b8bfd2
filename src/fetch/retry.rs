use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetrySettings;

use super::FetchError;

/// Retry/backoff policy shared by the refresh and backfill paths.
///
/// Delays grow exponentially from `base_delay` and are capped at `max_delay`.
/// Errors that `FetchError::is_retryable` rejects are returned immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn should_retry(&self, attempt: u32, err: &FetchError) -> bool {
        attempt < self.max_attempts && err.is_retryable()
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, err: &FetchError) -> Duration {
        let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
        let mut delay = self.base_delay.saturating_mul(exp).min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
            delay = delay.mul_f64(factor);
        }

        // A server-provided hint wins over our own schedule, within the cap.
        if let FetchError::RateLimited {
            retry_after: Some(hint),
        } = err
        {
            delay = delay.max(*hint).min(self.max_delay);
        }

        delay
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(attempt, &err) => {
                    let delay = self.delay_for(attempt, &err);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying fetch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(s: RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            jitter: s.jitter,
        }
    }
}
