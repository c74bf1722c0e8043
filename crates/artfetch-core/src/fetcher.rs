//! Single-page retrieval with classification and retry

use async_trait::async_trait;

use crate::config::{PageId, RunConfig};
use crate::error::{ConfigError, PipelineError};
use crate::outcome::{FetchOutcome, Fetched};
use crate::pool::ConnectionPool;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryPolicy, RetryState};

/// One attempt at retrieving a page, already classified.
///
/// Implementations never fail: every error becomes a [`FetchOutcome`] variant.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn attempt(&self, page_id: PageId) -> FetchOutcome;
}

/// HTTP source: `GET <base_url><page_id>` through the shared pool.
#[derive(Debug)]
pub struct HttpPageSource {
    pool: ConnectionPool,
    base_url: String,
    host: String,
}

impl HttpPageSource {
    /// Build the pool from `config` and check that `base_url` has a host.
    pub fn new(base_url: &str, config: &RunConfig) -> Result<Self, PipelineError> {
        let parsed = reqwest::Url::parse(base_url)
            .map_err(|_| ConfigError::InvalidBaseUrl(base_url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBaseUrl(base_url.to_string()))?
            .to_string();
        let headers = config.headers.to_header_map()?;
        let pool = ConnectionPool::new(
            &config.request.session,
            headers,
            config.request.request_timeout(),
        )
        .map_err(PipelineError::Client)?;

        Ok(Self {
            pool,
            base_url: base_url.to_string(),
            host,
        })
    }

    pub fn page_url(&self, page_id: PageId) -> String {
        format!("{}{page_id}", self.base_url)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn attempt(&self, page_id: PageId) -> FetchOutcome {
        let url = self.page_url(page_id);
        let conn = self.pool.acquire_connection(&self.host).await;
        let response = match conn.get(&url).await {
            Ok(r) => r,
            Err(e) => return FetchOutcome::from_reqwest(e),
        };
        let status = response.status();
        if !status.is_success() {
            return FetchOutcome::from_status(status.as_u16(), String::new());
        }
        // Body is read while the connection slot is still held
        match response.text().await {
            Ok(body) => FetchOutcome::Success {
                status: status.as_u16(),
                body,
            },
            Err(e) => FetchOutcome::from_reqwest(e),
        }
    }
}

/// Rate-limited, retrying fetch of one page.
#[derive(Debug)]
pub struct PageFetcher<S> {
    source: S,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl<S: PageSource> PageFetcher<S> {
    pub fn new(source: S, limiter: RateLimiter, policy: RetryPolicy) -> Self {
        Self {
            source,
            limiter,
            policy,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Fetch `page_id` until success, a non-retryable outcome, or the retry
    /// ceiling. The last outcome is returned, never raised.
    pub async fn fetch(&self, page_id: PageId) -> Fetched {
        self.limiter.await_slot().await;

        let mut state = self.policy.start();
        loop {
            state = match state {
                RetryState::Attempting(attempt) => {
                    let outcome = self.source.attempt(page_id).await;
                    self.policy.on_outcome(attempt, outcome)
                }
                RetryState::Waiting {
                    next_attempt,
                    delay,
                    last,
                } => {
                    log::debug!(
                        "page {page_id}: attempt {} got {last}, retrying in {:.2}s",
                        next_attempt - 1,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    RetryState::Attempting(next_attempt)
                }
                RetryState::Terminal { attempts, outcome } => {
                    return finish(page_id, outcome, attempts)
                }
            };
        }
    }
}

fn finish(page_id: PageId, outcome: FetchOutcome, attempts: u32) -> Fetched {
    if outcome.is_success() {
        log::debug!("page {page_id}: {outcome}");
    } else if outcome.is_retryable() {
        log::warn!("page {page_id}: {outcome}, giving up after {attempts} attempts");
    } else {
        log::warn!("page {page_id}: {outcome}");
    }
    Fetched {
        page_id,
        outcome,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::retry::Backoff;

    /// Replays scripted outcomes, repeating the last one.
    struct Scripted {
        outcomes: Mutex<Vec<FetchOutcome>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<FetchOutcome>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PageSource for Scripted {
        async fn attempt(&self, _page_id: PageId) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.pop().unwrap()
            } else {
                outcomes[0].clone()
            }
        }
    }

    fn fetcher(source: Scripted, retries: u32) -> PageFetcher<Scripted> {
        let zero = Duration::ZERO;
        PageFetcher::new(
            source,
            RateLimiter::new(zero, zero),
            RetryPolicy::new(retries, Backoff::new(zero, Duration::from_millis(1))),
        )
    }

    fn ok() -> FetchOutcome {
        FetchOutcome::Success {
            status: 200,
            body: "<html/>".to_string(),
        }
    }

    #[tokio::test]
    async fn always_server_error_makes_n_plus_one_attempts() {
        for n in [0, 1, 4] {
            let f = fetcher(Scripted::new(vec![FetchOutcome::ServerError { status: 503 }]), n);
            let fetched = f.fetch(7).await;
            assert_eq!(fetched.attempts, n + 1);
            assert_eq!(f.source().calls.load(Ordering::SeqCst), n + 1);
            assert_eq!(fetched.outcome, FetchOutcome::ServerError { status: 503 });
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let f = fetcher(
            Scripted::new(vec![FetchOutcome::Timeout, FetchOutcome::ServerError { status: 530 }, ok()]),
            3,
        );
        let fetched = f.fetch(1).await;
        assert!(fetched.outcome.is_success());
        assert_eq!(fetched.attempts, 3);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let f = fetcher(Scripted::new(vec![FetchOutcome::ClientError { status: 404 }]), 5);
        let fetched = f.fetch(2).await;
        assert_eq!(fetched.attempts, 1);
        assert_eq!(f.source().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn base_url_without_host_rejected() {
        let err = HttpPageSource::new("not a url", &RunConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn page_url_appends_id() {
        let source = HttpPageSource::new("https://habr.com/ru/articles/", &RunConfig::default())
            .unwrap();
        assert_eq!(source.page_url(42), "https://habr.com/ru/articles/42");
    }
}
