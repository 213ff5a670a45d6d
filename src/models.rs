//! Data models for fetched pages, extracted articles and emitted records.
//!
//! This module defines the core data structures used throughout the pipeline:
//! - [`FetchResult`]: One fetch of one URL, including the raw HTML
//! - [`Metadata`]: Head and structured-data fields parsed from a page
//! - [`ArticleContent`]: The main readable body inferred from a page
//! - [`AiSummary`]: The model-generated title, summary and relevance score
//! - [`ArticleRecord`]: The terminal output unit, one per admitted article
//!
//! Output structs serialize with camelCase field names to match the JSON
//! schema consumers of the output file expect.

use crate::error::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of fetching a single URL.
///
/// Owned by the worker handling that URL and dropped once extraction has
/// finished; `raw_html` never reaches the output.
#[derive(Debug)]
pub struct FetchResult {
    /// The URL as it was requested.
    pub requested_url: String,
    /// The final URL after redirects (equal to `requested_url` when no response arrived).
    pub loaded_url: String,
    /// When the final response (or the final failure) was observed.
    pub loaded_time: DateTime<Utc>,
    /// Status of the final response, when one was received.
    pub http_status_code: Option<u16>,
    /// Response body decoded as UTF-8 (lossy). Absent on failure.
    pub raw_html: Option<String>,
    /// Populated when no usable response was obtained.
    pub fetch_error: Option<FetchError>,
    /// Number of requests issued, including the first.
    pub attempts: u32,
}

impl FetchResult {
    /// Split a result into its status and HTML, or the error that prevented them.
    pub fn into_page(self) -> Result<(u16, String), FetchError> {
        if let Some(err) = self.fetch_error {
            return Err(err);
        }
        match (self.http_status_code, self.raw_html) {
            (Some(status), Some(html)) => Ok((status, html)),
            _ => Err(FetchError::Permanent("response carried no body".into())),
        }
    }
}

/// Page metadata read from canonical links, Open Graph, JSON-LD and meta tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub canonical_url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub source: Option<String>,
    pub author: Option<String>,
    pub keywords: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub language_code: Option<String>,
}

/// The inferred main body of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleContent {
    /// Display title.
    pub title: String,
    /// Plain text, paragraphs separated by a blank line. Never empty.
    pub text: String,
}

/// Model-generated summary of one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiSummary {
    /// Short headline-style title.
    pub title: String,
    /// Markdown bullet-point summary.
    pub summary: String,
    /// Relevance to the originating query, 0 (irrelevant) to 100.
    pub score: u8,
}

/// Crawl details for an emitted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Crawl {
    pub loaded_url: String,
    pub loaded_time: DateTime<Utc>,
    pub http_status_code: u16,
}

/// One admitted, non-duplicate article as written to the output array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleRecord {
    /// The URL that was requested.
    pub url: String,
    pub crawl: Crawl,
    /// Omitted entirely when summarization failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<AiSummary>,
    pub metadata: Metadata,
    pub title: String,
    pub text: String,
}
