//! LLM API interaction with exponential backoff retry logic.
//!
//! This module provides the transport side of summarization: a single
//! request to an OpenAI-compatible endpoint through `awful_aj`, and a retry
//! decorator with exponential backoff and jitter around it.
//!
//! # Architecture
//!
//! - [`AskAsync`]: Core trait defining async LLM interaction
//! - [`AwfulAsk`]: Sends one prompt through `awful_aj::api::ask` with a deadline
//! - [`RetryAsk`]: Decorator that adds retry logic to any `AskAsync` implementation
//!
//! # Retry Strategy
//!
//! - Retry count, base delay and cap come from [`crate::summarizer::SummarizerConfig`]
//! - Exponential backoff doubling from the base delay
//! - Random jitter added to prevent thundering herd

use crate::utils::backoff_delay;
use awful_aj::api::ask;
use awful_aj::{config::AwfulJadeConfig, template::ChatTemplate};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, instrument, warn};

/// Trait for async LLM interaction.
///
/// Implementors of this trait can send text to an LLM and receive a response.
/// This abstraction allows for different LLM backends or decorators (like retry logic).
pub trait AskAsync {
    /// The type of response returned by the LLM.
    type Response;

    /// Send text to the LLM and receive a response.
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// # Backoff Strategy
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter)
/// ```
pub struct RetryAsk<T> {
    /// The underlying LLM client to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
    /// Upper bound of the random delay added to each backoff.
    jitter: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// Create a new retry wrapper around an existing [`AskAsync`] implementation.
    ///
    /// The delay cap defaults to 30 seconds and jitter to 250ms.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = AwfulAsk::new(config, template, Duration::from_secs(120));
    /// let retry_client = RetryAsk::new(client, 5, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
            jitter: StdDuration::from_millis(250),
        }
    }

    pub fn with_max_delay(mut self, max_delay: StdDuration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: StdDuration) -> Self {
        self.jitter = jitter;
        self
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => {
                    return Ok(resp);
                }
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = backoff_delay(
                        self.base_delay,
                        (attempt - 1) as u32,
                        self.max_delay,
                        self.jitter,
                    );
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// One request to the configured model through `awful_aj`.
///
/// Config and template are loaded once at startup and shared by every
/// worker.
pub struct AwfulAsk {
    /// LLM configuration (API keys, endpoint, model settings).
    config: Arc<AwfulJadeConfig>,
    /// Chat template holding the system prompt.
    template: Arc<ChatTemplate>,
    /// Deadline for a single request.
    timeout: StdDuration,
}

impl AwfulAsk {
    pub fn new(
        config: Arc<AwfulJadeConfig>,
        template: Arc<ChatTemplate>,
        timeout: StdDuration,
    ) -> Self {
        Self {
            config,
            template,
            timeout,
        }
    }
}

impl fmt::Debug for AwfulAsk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwfulAsk")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AskAsync for AwfulAsk {
    type Response = String;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        let request = ask(&self.config, text.to_string(), &self.template, None, None);
        let res = match timeout(self.timeout, request).await {
            Ok(res) => res,
            Err(_) => Err(format!("model request timed out after {:?}", self.timeout).into()),
        };
        let dt = t0.elapsed();

        if let Err(e) = &res {
            warn!(elapsed_ms = dt.as_millis() as u64, error = %e, "API call failed");
        }
        res
    }
}
