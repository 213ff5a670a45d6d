//! Candidate URL discovery through external search providers.
//!
//! A provider turns a [`SearchQuery`] into article URLs, best match first.
//! Both providers fetch through the shared [`Fetcher`], so search requests
//! obey the same timeout, retry and per-host throttle as article fetches.
//! Any provider failure, including an empty result list, is fatal for the run.

pub mod duckduckgo;
pub mod google_news;

use crate::config::{CandidateSource, Job};
use crate::error::SearchError;
use crate::fetcher::Fetcher;
use crate::pipeline::Shutdown;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

pub use duckduckgo::DuckDuckGo;
pub use google_news::GoogleNews;

/// One search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    /// ISO 639-1 language code, e.g. `en`.
    pub language: String,
    /// ISO 3166-1 alpha-2 country code, e.g. `us`.
    pub country: String,
    pub max_results: usize,
}

/// Source of candidate article URLs.
pub trait SearchProvider {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, SearchError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// DuckDuckGo HTML results.
    #[default]
    Duckduckgo,
    /// Google News RSS search feed.
    GoogleNews,
}

/// Search settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub provider: ProviderKind,
    pub duckduckgo_endpoint: String,
    pub google_news_endpoint: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Duckduckgo,
            duckduckgo_endpoint: duckduckgo::ENDPOINT.to_string(),
            google_news_endpoint: google_news::ENDPOINT.to_string(),
        }
    }
}

/// The provider selected by configuration.
#[derive(Debug)]
pub enum AnyProvider<'a> {
    DuckDuckGo(DuckDuckGo<'a>),
    GoogleNews(GoogleNews<'a>),
}

impl<'a> AnyProvider<'a> {
    pub fn from_config(config: &SearchConfig, fetcher: &'a Fetcher) -> Self {
        match config.provider {
            ProviderKind::Duckduckgo => {
                Self::DuckDuckGo(DuckDuckGo::new(fetcher, &config.duckduckgo_endpoint))
            }
            ProviderKind::GoogleNews => {
                Self::GoogleNews(GoogleNews::new(fetcher, &config.google_news_endpoint))
            }
        }
    }
}

impl SearchProvider for AnyProvider<'_> {
    #[instrument(level = "info", skip_all, fields(query = %query.query))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, SearchError> {
        let urls = match self {
            Self::DuckDuckGo(p) => p.search(query).await?,
            Self::GoogleNews(p) => p.search(query).await?,
        };
        info!(found = urls.len(), "Search returned candidates");
        Ok(urls)
    }
}

/// Pairs every job with its candidate URLs, searching where the job asks for it.
///
/// A search failure aborts discovery. When `shutdown` fires mid-search the
/// pending search is dropped and only the jobs resolved so far are returned.
pub async fn discover<P: SearchProvider>(
    provider: &P,
    jobs: Vec<Job>,
    shutdown: &Shutdown,
) -> Result<Vec<(Job, Vec<String>)>, SearchError> {
    let total = jobs.len();
    let mut resolved = Vec::with_capacity(total);
    for job in jobs {
        let urls = match &job.source {
            CandidateSource::Seeds(urls) => urls.clone(),
            CandidateSource::Search(query) => {
                let found = tokio::select! {
                    found = provider.search(query) => found,
                    _ = shutdown.wait() => {
                        warn!(
                            resolved = resolved.len(),
                            total,
                            "Shutdown during discovery"
                        );
                        return Ok(resolved);
                    }
                };
                found
                    .inspect_err(|e| error!(query = %query.query, error = %e, "Search failed"))?
            }
        };
        resolved.push((job, urls));
    }
    Ok(resolved)
}

/// Fetch a provider page and insist on a 2xx answer.
async fn fetch_body(fetcher: &Fetcher, url: &str) -> Result<String, SearchError> {
    let (status, body) = fetcher.fetch(url).await.into_page()?;
    if !(200..300).contains(&status) {
        return Err(SearchError::Status(status));
    }
    Ok(body)
}

/// `Ok(urls)` unless there are none.
fn non_empty(urls: Vec<String>, query: &SearchQuery) -> Result<Vec<String>, SearchError> {
    if urls.is_empty() {
        return Err(SearchError::NoResults(query.query.clone()));
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::JobLimits;
    use crate::test_support::{Route, TestServer, fast_fetch_config, search_query};
    use std::time::Duration;
    use tokio::time::Instant;

    fn job(source: CandidateSource) -> Job {
        Job {
            query: "transit".into(),
            source,
            limits: JobLimits {
                max_articles: 3,
                recency_window: None,
            },
        }
    }

    #[test]
    fn test_provider_kind_serde() {
        let config: SearchConfig = serde_yaml::from_str("provider: google-news\n").unwrap();
        assert_eq!(config.provider, ProviderKind::GoogleNews);
        assert_eq!(config.duckduckgo_endpoint, duckduckgo::ENDPOINT);
    }

    #[test]
    fn test_non_empty() {
        let query = search_query("q", "en", "us", 3);
        assert!(matches!(
            non_empty(vec![], &query),
            Err(SearchError::NoResults(q)) if q == "q"
        ));
        assert_eq!(
            non_empty(vec!["a".into()], &query).unwrap(),
            vec!["a".to_string()]
        );
    }

    #[tokio::test]
    async fn test_discover_keeps_seeds_and_searches() {
        let results = r#"<a class="result__a" href="https://a.example/1">One</a>"#;
        let server = TestServer::start(vec![("/html/", Route::page(200, results))]).await;
        let fetcher = Fetcher::new(fast_fetch_config()).unwrap();
        let provider = DuckDuckGo::new(&fetcher, &server.url("/html/"));
        let seeds = vec!["https://seed.example/1".to_string()];
        let jobs = vec![
            job(CandidateSource::Seeds(seeds.clone())),
            job(CandidateSource::Search(search_query("transit", "en", "us", 3))),
        ];

        let resolved = discover(&provider, jobs, &Shutdown::new(None).1)
            .await
            .unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].1, seeds);
        assert_eq!(resolved[1].1, vec!["https://a.example/1".to_string()]);
    }

    #[tokio::test]
    async fn test_discover_fails_on_search_error() {
        let server = TestServer::start(vec![("/blocked/", Route::page(403, "captcha"))]).await;
        let fetcher = Fetcher::new(fast_fetch_config()).unwrap();
        let provider = DuckDuckGo::new(&fetcher, &server.url("/blocked/"));
        let search = CandidateSource::Search(search_query("transit", "en", "us", 3));
        let jobs = vec![job(search)];

        let result = discover(&provider, jobs, &Shutdown::new(None).1).await;
        assert!(matches!(result, Err(SearchError::Status(403))));
    }

    #[tokio::test]
    async fn test_discover_stops_when_shutdown_fires_mid_search() {
        let server = TestServer::start(vec![("/html/", Route::Hang)]).await;
        let fetcher = Fetcher::new(fast_fetch_config()).unwrap();
        let provider = DuckDuckGo::new(&fetcher, &server.url("/html/"));
        let jobs = vec![
            job(CandidateSource::Seeds(vec!["https://seed.example/1".into()])),
            job(CandidateSource::Search(search_query("first", "en", "us", 3))),
            job(CandidateSource::Search(search_query("second", "en", "us", 3))),
        ];
        let (_stop, shutdown) = Shutdown::new(Some(Duration::from_millis(100)));

        // A hung search would otherwise spend every retry before failing.
        let started = Instant::now();
        let resolved = discover(&provider, jobs, &shutdown).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(280));
        assert_eq!(resolved.len(), 1);
        assert!(matches!(resolved[0].0.source, CandidateSource::Seeds(_)));
        assert_eq!(server.hits(), 1);
    }
}
