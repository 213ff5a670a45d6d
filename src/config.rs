//! Run settings with layered loading.
//!
//! Precedence (highest wins):
//! 1. Command-line flags (and their environment variables)
//! 2. YAML settings file (`--config`)
//! 3. Built-in defaults
//!
//! The `awful_aj` model config and chat template are loaded separately by
//! the summarizer; this file only names them.

use crate::cli::Cli;
use crate::extractors::ExtractConfig;
use crate::fetcher::FetchConfig;
use crate::pipeline::JobLimits;
use crate::search::{SearchConfig, SearchQuery};
use crate::summarizer::SummarizerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument};

const MAX_ARTICLES_LIMIT: usize = 500;
const MAX_CONCURRENCY: usize = 64;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Everything a run needs besides its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Query used when none is given on the command line.
    pub query: Option<String>,
    pub language: String,
    pub country: String,
    pub max_articles: usize,
    /// Articles published earlier than this many hours ago are dropped.
    /// `None` disables the check.
    pub recency_window_hours: Option<u64>,
    pub concurrency: usize,
    /// Wall-clock limit for the whole run.
    pub deadline_secs: Option<u64>,
    pub fetch: FetchConfig,
    pub extract: ExtractConfig,
    pub summarizer: SummarizerConfig,
    pub search: SearchConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            query: None,
            language: "en".to_string(),
            country: "us".to_string(),
            max_articles: 10,
            recency_window_hours: Some(24),
            concurrency: 6,
            deadline_secs: None,
            fetch: FetchConfig::default(),
            extract: ExtractConfig::default(),
            summarizer: SummarizerConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Settings {
    /// Read settings from a YAML file, or use the defaults when `path` is `None`.
    #[instrument(level = "info", skip_all, fields(path = path.unwrap_or("<defaults>")))]
    pub async fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::LoadFailed(format!("{path}: {e}")))?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings = serde_yaml::from_str(&raw)
            .map_err(|e| ConfigError::LoadFailed(format!("{path}: {e}")))?;
        info!(path, "Loaded settings");
        Ok(settings)
    }

    /// Overlay command-line values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(q) = &cli.query {
            self.query = Some(q.clone());
        }
        if let Some(language) = &cli.language {
            self.language = language.clone();
        }
        if let Some(country) = &cli.country {
            self.country = country.clone();
        }
        if let Some(n) = cli.max_articles {
            self.max_articles = n;
        }
        if let Some(h) = cli.since_hours {
            self.recency_window_hours = Some(h);
        }
        if let Some(n) = cli.concurrency {
            self.concurrency = n;
        }
        if let Some(s) = cli.deadline_secs {
            self.deadline_secs = Some(s);
        }
        if let Some(backend) = cli.summarizer {
            self.summarizer.backend = backend;
        }
        if let Some(provider) = cli.search_provider {
            self.search.provider = provider;
        }
    }

    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `fetch.timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `fetch.user_agent` is empty or `fetch.max_bytes` is 0
    /// - `max_articles` is outside 1–500 or `concurrency` outside 1–64
    /// - `recency_window_hours` or `deadline_secs` is 0
    /// - `summarizer.max_input_chars` is below 500
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.timeout_ms < 100 {
            return Err(invalid("fetch.timeout_ms", "must be at least 100ms"));
        }
        if self.fetch.timeout_ms > 300_000 {
            return Err(invalid("fetch.timeout_ms", "must not exceed 5 minutes"));
        }
        if self.fetch.user_agent.trim().is_empty() {
            return Err(invalid("fetch.user_agent", "must not be empty"));
        }
        if self.fetch.max_bytes == 0 {
            return Err(invalid("fetch.max_bytes", "must be greater than 0"));
        }
        validate_max_articles(self.max_articles)?;
        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(invalid("concurrency", "must be between 1 and 64"));
        }
        if self.recency_window_hours == Some(0) {
            return Err(invalid("recency_window_hours", "must be greater than 0"));
        }
        if self.deadline_secs == Some(0) {
            return Err(invalid("deadline_secs", "must be greater than 0"));
        }
        if self.summarizer.max_input_chars < 500 {
            return Err(invalid("summarizer.max_input_chars", "must be at least 500"));
        }
        if self.summarizer.timeout_ms < 100 {
            return Err(invalid("summarizer.timeout_ms", "must be at least 100ms"));
        }
        if self.summarizer.template.trim().is_empty() {
            return Err(invalid("summarizer.template", "must not be empty"));
        }
        Ok(())
    }

    fn limits(&self, max_articles: usize, hours: Option<u64>) -> JobLimits {
        JobLimits {
            max_articles,
            recency_window: hours.map(|h| chrono::Duration::hours(h as i64)),
        }
    }
}

fn validate_max_articles(n: usize) -> Result<(), ConfigError> {
    if !(1..=MAX_ARTICLES_LIMIT).contains(&n) {
        return Err(invalid("max_articles", "must be between 1 and 500"));
    }
    Ok(())
}

/// Where a job's candidate URLs come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    /// Ask the configured search provider.
    Search(SearchQuery),
    /// Process these URLs as given.
    Seeds(Vec<String>),
}

/// One query's worth of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Relevance context for summaries.
    pub query: String,
    pub source: CandidateSource,
    pub limits: JobLimits,
}

/// `{"queries": [...]}` input file.
#[derive(Debug, Deserialize)]
pub struct QueryFile {
    pub queries: Vec<QueryEntry>,
}

#[derive(Debug, Deserialize)]
pub struct QueryEntry {
    pub query: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// DuckDuckGo-style `country-language`, e.g. `us-en`.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub max_articles: Option<usize>,
    #[serde(default, alias = "hours_back")]
    pub recency_window_hours: Option<u64>,
    /// Seed URLs; when present the query is not searched.
    #[serde(default)]
    pub urls: Vec<String>,
}

impl QueryEntry {
    fn into_job(self, settings: &Settings) -> Result<Job, ConfigError> {
        let query = self.query.trim().to_string();
        if query.is_empty() && self.urls.is_empty() {
            return Err(invalid("queries[].query", "must not be empty"));
        }

        let region = self.region.as_deref().and_then(|r| r.split_once('-'));
        let (region_country, region_language) = match region {
            Some((c, l)) => (Some(c.to_string()), Some(l.to_string())),
            None => (None, None),
        };
        let language = self
            .language
            .or(region_language)
            .unwrap_or_else(|| settings.language.clone());
        let country = self
            .country
            .or(region_country)
            .unwrap_or_else(|| settings.country.clone());

        let max_articles = self.max_articles.unwrap_or(settings.max_articles);
        validate_max_articles(max_articles)?;
        if self.recency_window_hours == Some(0) {
            return Err(invalid("queries[].hours_back", "must be greater than 0"));
        }
        let hours = self.recency_window_hours.or(settings.recency_window_hours);

        let source = if self.urls.is_empty() {
            CandidateSource::Search(SearchQuery {
                query: query.clone(),
                language,
                country,
                max_results: max_articles,
            })
        } else {
            CandidateSource::Seeds(self.urls)
        };
        Ok(Job {
            query,
            source,
            limits: settings.limits(max_articles, hours),
        })
    }
}

/// Parse a query file body.
pub fn parse_query_file(raw: &str, settings: &Settings) -> Result<Vec<Job>, ConfigError> {
    let file: QueryFile = serde_json::from_str(raw)
        .map_err(|e| ConfigError::LoadFailed(format!("query file: {e}")))?;
    if file.queries.is_empty() {
        return Err(ConfigError::Missing {
            field: "queries".into(),
            hint: "the input file must contain at least one query".into(),
        });
    }
    file.queries
        .into_iter()
        .map(|q| q.into_job(settings))
        .collect()
}

/// Seed URLs from a text file: one per line, blank lines and `#` comments skipped.
pub fn parse_urls_file(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Turn settings and command-line inputs into the list of jobs for this run.
///
/// `--input` wins over everything else. Otherwise seed URLs (`--url`,
/// `--urls-file`) make a single job without search, and a bare query makes
/// a single search job.
#[instrument(level = "info", skip_all)]
pub async fn build_jobs(settings: &Settings, cli: &Cli) -> Result<Vec<Job>, ConfigError> {
    if let Some(path) = &cli.input {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::LoadFailed(format!("{path}: {e}")))?;
        let jobs = parse_query_file(&raw, settings)?;
        info!(path, jobs = jobs.len(), "Loaded query file");
        return Ok(jobs);
    }

    let mut seeds = cli.urls.clone();
    if let Some(path) = &cli.urls_file {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::LoadFailed(format!("{path}: {e}")))?;
        let from_file = parse_urls_file(&raw);
        debug!(path, urls = from_file.len(), "Loaded URL file");
        seeds.extend(from_file);
    }

    let query = settings.query.clone().unwrap_or_default();
    let limits = settings.limits(settings.max_articles, settings.recency_window_hours);

    if !seeds.is_empty() {
        let job = Job {
            query,
            source: CandidateSource::Seeds(seeds),
            limits,
        };
        return Ok(vec![job]);
    }
    if query.trim().is_empty() {
        return Err(ConfigError::Missing {
            field: "query".into(),
            hint: "pass --query, --input or --url".into(),
        });
    }
    let search = SearchQuery {
        query: query.clone(),
        language: settings.language.clone(),
        country: settings.country.clone(),
        max_results: settings.max_articles,
    };
    let job = Job {
        query,
        source: CandidateSource::Search(search),
        limits,
    };
    Ok(vec![job])
}
