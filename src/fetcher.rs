//! Rate-limited, retrying HTTP retrieval of article pages.
//!
//! # Retry Strategy
//!
//! Network-level failures (timeouts, refused or reset connections, DNS
//! failures, interrupted bodies) are retried up to `max_retries` times:
//!
//! ```text
//! delay = min(backoff_base * 2^attempt, max_backoff) + random_jitter(0..=jitter)
//! ```
//!
//! Anything else (bad URL, redirect cap, oversized body) fails immediately.
//! HTTP error statuses are *not* failures here: the response is returned with
//! its status so the caller can decide what to do with a 404 or a 503.
//!
//! # Politeness
//!
//! Requests to the same host are spaced at least `per_host_interval_ms`
//! apart, across every worker sharing the [`Fetcher`].

use crate::error::FetchError;
use crate::models::FetchResult;
use crate::utils::backoff_delay;
use chrono::Utc;
use reqwest::{Client, header, redirect};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until};
use tracing::{debug, instrument, warn};
use url::Url;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Configuration for the [`Fetcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request deadline in milliseconds.
    pub timeout_ms: u64,
    /// Redirects followed before giving up.
    pub max_redirects: usize,
    /// User-Agent header sent with every request.
    pub user_agent: String,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// First backoff delay in milliseconds; doubles each retry.
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay.
    pub max_backoff_ms: u64,
    /// Random jitter added to each backoff delay.
    pub jitter_ms: u64,
    /// Largest body accepted, in bytes.
    pub max_bytes: usize,
    /// Minimum spacing between requests to one host.
    pub per_host_interval_ms: u64,
    /// Honour HTTP(S)_PROXY / NO_PROXY from the environment.
    pub use_env_proxy: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_redirects: 10,
            user_agent: concat!("news_digest/", env!("CARGO_PKG_VERSION")).to_string(),
            max_retries: 3,
            backoff_base_ms: 500,
            max_backoff_ms: 30_000,
            jitter_ms: 250,
            max_bytes: 5 * 1024 * 1024,
            per_host_interval_ms: 250,
            use_env_proxy: true,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Spaces out requests to the same host.
///
/// The lock is only held long enough to reserve the next slot; waiting for
/// the slot happens outside it.
#[derive(Debug)]
struct HostThrottle {
    interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, host: &str) {
        if self.interval.is_zero() {
            return;
        }
        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots
                .get(host)
                .copied()
                .filter(|s| *s > now)
                .unwrap_or(now);
            slots.insert(host.to_string(), slot + self.interval);
            slot
        };
        sleep_until(slot.into()).await;
    }
}

/// A single failed attempt, with the status if a response arrived.
struct AttemptFailure {
    error: FetchError,
    status: Option<u16>,
    loaded_url: Option<String>,
}

impl From<FetchError> for AttemptFailure {
    fn from(error: FetchError) -> Self {
        Self {
            error,
            status: None,
            loaded_url: None,
        }
    }
}

struct Page {
    status: u16,
    loaded_url: String,
    html: String,
}

/// HTTP client shared by every pipeline worker.
#[derive(Debug)]
pub struct Fetcher {
    http: Client,
    config: FetchConfig,
    throttle: HostThrottle,
}

impl Fetcher {
    /// Build a fetcher from its configuration.
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .redirect(redirect::Policy::limited(config.max_redirects));
        if !config.use_env_proxy {
            builder = builder.no_proxy();
        }
        let http = builder
            .build()
            .map_err(|e| FetchError::Permanent(format!("failed to build HTTP client: {e}")))?;

        let throttle = HostThrottle::new(Duration::from_millis(config.per_host_interval_ms));
        Ok(Self {
            http,
            config,
            throttle,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch `url`, retrying transient failures.
    ///
    /// Never returns an error directly: failures are carried in
    /// [`FetchResult::fetch_error`] so the caller always gets the attempt count
    /// and the last status seen.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn fetch(&self, url: &str) -> FetchResult {
        let started = Instant::now();
        let parsed = match parse_fetchable(url) {
            Ok(u) => u,
            Err(error) => return self.failed(url, error, None, None, 0),
        };
        let host = parsed.host_str().unwrap_or_default().to_string();
        let base = Duration::from_millis(self.config.backoff_base_ms);
        let cap = Duration::from_millis(self.config.max_backoff_ms);
        let jitter = Duration::from_millis(self.config.jitter_ms);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.throttle.acquire(&host).await;

            match self.attempt(&parsed).await {
                Ok(page) => {
                    debug!(
                        status = page.status,
                        loaded_url = %page.loaded_url,
                        attempts = attempt,
                        bytes = page.html.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Fetched page"
                    );
                    return FetchResult {
                        requested_url: url.to_string(),
                        loaded_url: page.loaded_url,
                        loaded_time: Utc::now(),
                        http_status_code: Some(page.status),
                        raw_html: Some(page.html),
                        fetch_error: None,
                        attempts: attempt,
                    };
                }
                Err(failure) if failure.error.is_transient() => {
                    let retries_used = attempt - 1;
                    if retries_used >= self.config.max_retries {
                        warn!(attempts = attempt, error = %failure.error, "retries exhausted");
                        let error = FetchError::RetriesExhausted {
                            attempts: attempt,
                            last: failure.error.to_string(),
                        };
                        return self.failed(url, error, failure.status, failure.loaded_url, attempt);
                    }
                    let delay = backoff_delay(base, retries_used, cap, jitter);
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        ?delay,
                        error = %failure.error,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
                Err(failure) => {
                    warn!(attempts = attempt, error = %failure.error, "fetch failed permanently");
                    return self.failed(
                        url,
                        failure.error,
                        failure.status,
                        failure.loaded_url,
                        attempt,
                    );
                }
            }
        }
    }

    /// One GET. The body is read chunk by chunk and abandoned as soon as it
    /// passes `max_bytes`, whether or not the server sent a Content-Length.
    async fn attempt(&self, url: &Url) -> Result<Page, AttemptFailure> {
        let mut response = self
            .http
            .get(url.clone())
            .header(header::ACCEPT, ACCEPT_HTML)
            .send()
            .await
            .map_err(FetchError::from)?;

        let status = response.status().as_u16();
        let loaded_url = response.url().to_string();
        let limit = self.config.max_bytes;
        let with_status = |error: FetchError| AttemptFailure {
            error,
            status: Some(status),
            loaded_url: Some(loaded_url.clone()),
        };

        let declared = response.content_length().unwrap_or(0) as usize;
        if declared > limit {
            return Err(with_status(FetchError::TooLarge { limit }));
        }

        let mut body = Vec::with_capacity(declared);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| with_status(FetchError::from(e)))?
        {
            if body.len() + chunk.len() > limit {
                debug!(read = body.len(), limit, "body over size cap; abandoning");
                return Err(with_status(FetchError::TooLarge { limit }));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(Page {
            status,
            loaded_url: loaded_url.clone(),
            html: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    fn failed(
        &self,
        url: &str,
        error: FetchError,
        status: Option<u16>,
        loaded_url: Option<String>,
        attempts: u32,
    ) -> FetchResult {
        FetchResult {
            requested_url: url.to_string(),
            loaded_url: loaded_url.unwrap_or_else(|| url.to_string()),
            loaded_time: Utc::now(),
            http_status_code: status,
            raw_html: None,
            fetch_error: Some(error),
            attempts,
        }
    }
}

fn parse_fetchable(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url.trim()).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::UnsupportedScheme(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Route, TestServer, fast_fetch_config as test_config};

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(10_000));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_redirects, 10);
        assert!(config.user_agent.starts_with("news_digest/"));
    }

    #[test]
    fn test_parse_fetchable_rejects_other_schemes() {
        assert!(matches!(
            parse_fetchable("ftp://example.com/a"),
            Err(FetchError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            parse_fetchable("not a url"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(parse_fetchable(" https://example.com/a ").is_ok());
    }

    #[tokio::test]
    async fn test_fetch_ok_returns_html_and_status() {
        let server = TestServer::start(vec![("/a", Route::page(200, "<p>hello</p>"))]).await;
        let fetcher = Fetcher::new(test_config()).unwrap();

        let result = fetcher.fetch(&server.url("/a")).await;
        assert!(result.fetch_error.is_none());
        assert_eq!(result.http_status_code, Some(200));
        assert_eq!(result.raw_html.as_deref(), Some("<p>hello</p>"));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_raised() {
        let server = TestServer::start(vec![("/gone", Route::page(404, "page not found"))]).await;
        let fetcher = Fetcher::new(test_config()).unwrap();

        let result = fetcher.fetch(&server.url("/gone")).await;
        assert!(result.fetch_error.is_none());
        assert_eq!(result.http_status_code, Some(404));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_follows_redirects_and_records_loaded_url() {
        let server = TestServer::start(vec![
            ("/old", Route::Redirect("/new".into())),
            ("/new", Route::page(200, "moved")),
        ])
        .await;
        let fetcher = Fetcher::new(test_config()).unwrap();

        let result = fetcher.fetch(&server.url("/old?x=1")).await;
        assert_eq!(result.requested_url, server.url("/old?x=1"));
        assert_eq!(result.loaded_url, server.url("/new"));
        assert_eq!(result.raw_html.as_deref(), Some("moved"));
    }

    #[tokio::test]
    async fn test_redirect_cap_is_permanent() {
        let server = TestServer::start(vec![("/loop", Route::Redirect("/loop".into()))]).await;
        let config = FetchConfig {
            max_redirects: 2,
            ..test_config()
        };
        let fetcher = Fetcher::new(config).unwrap();

        let result = fetcher.fetch(&server.url("/loop")).await;
        assert!(matches!(result.fetch_error, Some(FetchError::Redirects(_))));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_bound_on_timeouts() {
        let server = TestServer::start(vec![("/slow", Route::Hang)]).await;
        let config = FetchConfig {
            timeout_ms: 100,
            ..test_config()
        };
        let fetcher = Fetcher::new(config).unwrap();

        let result = fetcher.fetch(&server.url("/slow")).await;
        assert_eq!(result.attempts, 4);
        assert!(result.raw_html.is_none());
        assert!(result.http_status_code.is_none());
        assert!(matches!(
            result.fetch_error,
            Some(FetchError::RetriesExhausted { attempts: 4, .. })
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.hits(), 4);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_with_status() {
        let server = TestServer::start(vec![("/big", Route::page(200, "x".repeat(2048)))]).await;
        let config = FetchConfig {
            max_bytes: 1024,
            ..test_config()
        };
        let fetcher = Fetcher::new(config).unwrap();

        let result = fetcher.fetch(&server.url("/big")).await;
        assert!(matches!(
            result.fetch_error,
            Some(FetchError::TooLarge { limit: 1024 })
        ));
        assert_eq!(result.http_status_code, Some(200));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_chunked_body_without_length_is_cut_off_at_cap() {
        // Never ends on its own: reading it whole would time out and retry.
        let chunk = "x".repeat(1024);
        let server = TestServer::start(vec![("/endless", Route::Stream { chunk })]).await;
        let config = FetchConfig {
            max_bytes: 4096,
            ..test_config()
        };
        let fetcher = Fetcher::new(config).unwrap();

        let result = fetcher.fetch(&server.url("/endless")).await;
        assert!(matches!(
            result.fetch_error,
            Some(FetchError::TooLarge { limit: 4096 })
        ));
        assert_eq!(result.http_status_code, Some(200));
        assert!(result.raw_html.is_none());
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_host_throttle_spaces_requests() {
        let throttle = HostThrottle::new(Duration::from_millis(40));
        let start = Instant::now();
        throttle.acquire("a.test").await;
        throttle.acquire("a.test").await;
        throttle.acquire("a.test").await;
        assert!(start.elapsed() >= Duration::from_millis(80));

        let other = Instant::now();
        throttle.acquire("b.test").await;
        assert!(other.elapsed() < Duration::from_millis(40));
    }
}
