//! The fetch → extract → deduplicate → summarize pipeline for one job.
//!
//! Every candidate URL moves through
//! `fetched → extracted → dedup-checked → summarized | summary skipped → emitted`
//! or stops at one of the [`DropReason`]s. Workers run as a bounded
//! `buffer_unordered` stream inside the calling task, so results are
//! gathered in one place; only the [`Deduplicator`] is shared between them.
//!
//! Output order is admission order: the order in which the deduplicator
//! accepted each article, not the order in which workers finished.

use crate::dedup::{Admission, Deduplicator};
use crate::extractors::{ExtractConfig, extract_article, extract_metadata};
use crate::fetcher::Fetcher;
use crate::models::{ArticleRecord, Crawl};
use crate::summarizer::Summarize;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, instrument, warn};

/// Per-job bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLimits {
    /// Candidates beyond this many are never fetched.
    pub max_articles: usize,
    /// Articles published longer ago than this are dropped. Unknown publish
    /// times always pass.
    pub recency_window: Option<chrono::Duration>,
}

/// Why a candidate URL produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    FetchFailed,
    HttpStatus,
    ExtractionFailed,
    Stale,
    Duplicate,
}

/// Counts for one run (or one job, before merging).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Unique candidate URLs after the `max_articles` cap.
    pub candidates: usize,
    /// Candidates that ran to an outcome (emitted or dropped).
    pub attempted: usize,
    pub emitted: usize,
    pub summarized: usize,
    pub summary_failed: usize,
    /// Candidates abandoned or never started because of shutdown.
    pub cancelled: usize,
    pub dropped: BTreeMap<DropReason, usize>,
}

impl RunReport {
    pub fn dropped(&self, reason: DropReason) -> usize {
        self.dropped.get(&reason).copied().unwrap_or(0)
    }

    fn record_drop(&mut self, reason: DropReason) {
        *self.dropped.entry(reason).or_default() += 1;
    }

    pub fn merge(&mut self, other: RunReport) {
        self.candidates += other.candidates;
        self.attempted += other.attempted;
        self.emitted += other.emitted;
        self.summarized += other.summarized;
        self.summary_failed += other.summary_failed;
        self.cancelled += other.cancelled;
        for (reason, n) in other.dropped {
            *self.dropped.entry(reason).or_default() += n;
        }
    }
}

/// Records and counts produced by one job.
#[derive(Debug, Default)]
pub struct JobOutput {
    /// In admission order.
    pub records: Vec<ArticleRecord>,
    pub report: RunReport,
}

/// Run-wide cancellation: Ctrl-C (through the paired sender) or a deadline.
#[derive(Debug, Clone)]
pub struct Shutdown {
    signal: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl Shutdown {
    /// A shutdown that fires when `true` is sent, or when `limit` elapses.
    pub fn new(limit: Option<Duration>) -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        let deadline = limit.map(|d| Instant::now() + d);
        let shutdown = Self {
            signal: rx,
            deadline,
        };
        (tx, shutdown)
    }

    /// Resolves once shutdown has been requested. A dropped sender never fires.
    pub async fn wait(&self) {
        let mut signal = self.signal.clone();
        let requested = async move {
            if signal.wait_for(|&stop| stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        match self.deadline {
            Some(at) => {
                tokio::select! {
                    _ = requested => {}
                    _ = sleep_until(at) => {}
                }
            }
            None => requested.await,
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.signal.borrow() || self.deadline.is_some_and(|at| Instant::now() >= at)
    }
}

enum Outcome {
    Emitted {
        order: usize,
        record: ArticleRecord,
        summarized: bool,
    },
    Dropped(DropReason),
}

/// Shared stages plus the worker bound.
pub struct Pipeline<'a, S> {
    fetcher: &'a Fetcher,
    extract: &'a ExtractConfig,
    summarizer: &'a S,
    concurrency: usize,
}

impl<'a, S> Pipeline<'a, S>
where
    S: Summarize,
{
    pub fn new(
        fetcher: &'a Fetcher,
        extract: &'a ExtractConfig,
        summarizer: &'a S,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            extract,
            summarizer,
            concurrency: concurrency.max(1),
        }
    }

    /// Process `urls` for `query` and return the admitted records.
    ///
    /// Candidates are de-duplicated by exact string, then capped at
    /// `limits.max_articles`. Work still in flight when `shutdown` fires is
    /// discarded and counted as cancelled.
    #[instrument(level = "info", skip_all, fields(%query, urls = urls.len()))]
    pub async fn run(
        &self,
        query: &str,
        urls: &[String],
        limits: JobLimits,
        dedup: &Deduplicator,
        shutdown: &Shutdown,
    ) -> JobOutput {
        let candidates: Vec<&str> = urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .unique()
            .take(limits.max_articles)
            .collect();

        let mut report = RunReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        if shutdown.is_triggered() {
            warn!(
                candidates = candidates.len(),
                "Shutdown requested before start; skipping job"
            );
            report.cancelled = candidates.len();
            return JobOutput {
                records: Vec::new(),
                report,
            };
        }

        let started = std::time::Instant::now();
        info!(
            candidates = candidates.len(),
            concurrency = self.concurrency,
            "Starting job"
        );

        let outcomes: Vec<Outcome> = stream::iter(candidates.iter().copied())
            .map(|url| self.process(url, query, limits, dedup))
            .buffer_unordered(self.concurrency)
            .take_until(shutdown.wait())
            .collect()
            .await;

        report.attempted = outcomes.len();
        report.cancelled = candidates.len() - outcomes.len();

        let mut admitted = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Emitted {
                    order,
                    record,
                    summarized,
                } => {
                    report.emitted += 1;
                    if summarized {
                        report.summarized += 1;
                    } else {
                        report.summary_failed += 1;
                    }
                    admitted.push((order, record));
                }
                Outcome::Dropped(reason) => report.record_drop(reason),
            }
        }
        admitted.sort_by_key(|(order, _)| *order);

        if report.cancelled > 0 {
            warn!(cancelled = report.cancelled, "Shutdown interrupted job");
        }
        info!(
            emitted = report.emitted,
            dropped = report.attempted - report.emitted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Completed job"
        );

        JobOutput {
            records: admitted.into_iter().map(|(_, r)| r).collect(),
            report,
        }
    }

    #[instrument(level = "info", skip_all, fields(%url))]
    async fn process(
        &self,
        url: &str,
        query: &str,
        limits: JobLimits,
        dedup: &Deduplicator,
    ) -> Outcome {
        let fetched = self.fetcher.fetch(url).await;
        let loaded_url = fetched.loaded_url.clone();
        let loaded_time = fetched.loaded_time;
        let attempts = fetched.attempts;

        let (status, html) = match fetched.into_page() {
            Ok(page) => page,
            Err(e) => {
                warn!(attempts, error = %e, "Fetch failed; dropping URL");
                return Outcome::Dropped(DropReason::FetchFailed);
            }
        };
        if status >= 400 {
            warn!(status, "HTTP error status; dropping URL");
            return Outcome::Dropped(DropReason::HttpStatus);
        }

        let metadata = extract_metadata(&html, &loaded_url);
        let article = match extract_article(&html, self.extract) {
            Ok(article) => article,
            Err(e) => {
                warn!(error = %e, "Extraction failed; dropping URL");
                return Outcome::Dropped(DropReason::ExtractionFailed);
            }
        };
        drop(html);

        if let (Some(window), Some(published)) = (limits.recency_window, metadata.published) {
            if published < Utc::now() - window {
                debug!(%published, "Outside recency window; dropping URL");
                return Outcome::Dropped(DropReason::Stale);
            }
        }

        let order = match dedup.admit(&metadata, url) {
            Admission::Admitted { order } => order,
            Admission::Duplicate { first_url } => {
                info!(
                    canonical = %metadata.canonical_url,
                    %first_url,
                    "Duplicate article; dropping URL"
                );
                return Outcome::Dropped(DropReason::Duplicate);
            }
        };

        let ai_summary = match self.summarizer.summarize(&article.text, query).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "Summarization failed; emitting without summary");
                None
            }
        };
        let summarized = ai_summary.is_some();

        debug!(
            order,
            chars = article.text.len(),
            summarized,
            "Article admitted"
        );
        let record = ArticleRecord {
            url: url.to_string(),
            crawl: Crawl {
                loaded_url,
                loaded_time,
                http_status_code: status,
            },
            ai_summary,
            metadata,
            title: article.title,
            text: article.text,
        };
        Outcome::Emitted {
            order,
            record,
            summarized,
        }
    }
}
