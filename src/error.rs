//! Error types for each stage of the pipeline.
//!
//! Per-URL errors ([`FetchError`], [`ExtractionError`], [`SummarizationError`])
//! never leave the worker that produced them: the orchestrator turns them into
//! a dropped URL or a record without a summary. [`SearchError`] and
//! [`crate::config::ConfigError`] are the only run-fatal errors.

use thiserror::Error;

/// Failure to retrieve a page.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The URL could not be parsed.
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Only http and https are fetched.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Timeout, refused connection, reset, or a failed DNS lookup.
    #[error("transient network error: {0}")]
    Transient(String),

    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Redirect loop or more redirects than allowed.
    #[error("redirect limit exceeded: {0}")]
    Redirects(String),

    /// The response body is larger than the configured cap.
    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// Any other non-retryable client failure.
    #[error("request failed: {0}")]
    Permanent(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_redirect() {
            FetchError::Redirects(err.to_string())
        } else if err.is_builder() {
            FetchError::Permanent(err.to_string())
        } else if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            FetchError::Transient(err.to_string())
        } else {
            FetchError::Permanent(err.to_string())
        }
    }
}

/// The page did not contain a usable article body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// No paragraph-like block survived boilerplate removal.
    #[error("no readable content found")]
    NoContent,

    /// The best region is too small to be an article (cookie wall, paywall stub, 404 page).
    #[error("extracted text is {found} chars, below the {min}-char minimum")]
    TooShort { found: usize, min: usize },
}

/// The summarization backend did not produce a usable summary.
#[derive(Debug, Clone, Error)]
pub enum SummarizationError {
    /// Every attempt against the model failed.
    #[error("model request failed after retries: {0}")]
    Exhausted(String),

    /// The model answered, but not with the requested structure.
    #[error("malformed model response: {0}")]
    Malformed(String),

    /// There was nothing to summarize.
    #[error("article text is empty")]
    Empty,
}

/// The search provider could not supply candidate URLs.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("search provider answered HTTP {0}")]
    Status(u16),

    #[error("could not parse search response: {0}")]
    Parse(String),

    #[error("no results for query {0:?}")]
    NoResults(String),
}
