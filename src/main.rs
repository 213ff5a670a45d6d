//! # news_digest
//!
//! Finds news articles for a query, extracts their full text and metadata
//! from arbitrary publisher pages, drops syndicated copies, and attaches an
//! AI-generated summary with a relevance score to each one. The result is a
//! JSON array of article records.
//!
//! ## Usage
//!
//! ```sh
//! news_digest -q "city council transit budget" -o ./out/digest.json
//! ```
//!
//! ## Architecture
//!
//! 1. **Discovery**: search provider (DuckDuckGo or Google News) or seed URLs
//! 2. **Fetching**: bounded, retried, per-host throttled HTTP
//! 3. **Extraction**: metadata and main-body text from the same HTML
//! 4. **Dedup**: first article per canonical URL wins, across all queries
//! 5. **Summarization**: chat model through `awful_aj`, or offline extraction
//! 6. **Output**: JSON array to a file or stdout, plus an optional run report

use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod dedup;
mod error;
mod extractors;
mod fetcher;
mod models;
mod outputs;
mod pipeline;
mod search;
mod summarizer;
#[cfg(test)]
mod test_support;
mod utils;

use cli::Cli;
use config::Settings;
use dedup::Deduplicator;
use fetcher::Fetcher;
use outputs::json;
use pipeline::{DropReason, Pipeline, RunReport, Shutdown};
use search::AnyProvider;
use summarizer::AnySummarizer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    // ---- Settings and jobs ----
    let mut settings = Settings::load(args.config.as_deref())
        .await
        .inspect_err(|e| error!(error = %e, "Could not load settings"))?;
    settings.apply_cli(&args);
    settings
        .validate()
        .inspect_err(|e| error!(error = %e, "Invalid settings"))?;

    let jobs = config::build_jobs(&settings, &args)
        .await
        .inspect_err(|e| error!(error = %e, "No work to do"))?;
    info!(
        jobs = jobs.len(),
        concurrency = settings.concurrency,
        summarizer = ?settings.summarizer.backend,
        "Settings loaded"
    );

    let (stop, shutdown) = Shutdown::new(settings.deadline_secs.map(Duration::from_secs));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; keeping articles that already finished");
            let _ = stop.send(true);
        }
    });

    let summarizer = AnySummarizer::from_config(&settings.summarizer)
        .await
        .inspect_err(|e| error!(error = %e, "Could not set up summarizer"))?;
    let fetcher = Fetcher::new(settings.fetch.clone())?;
    info!(
        timeout_ms = fetcher.config().timeout_ms,
        max_retries = fetcher.config().max_retries,
        "HTTP client ready"
    );

    // ---- Discovery: every job's candidates before any article work ----
    let provider = AnyProvider::from_config(&settings.search, &fetcher);
    let resolved = search::discover(&provider, jobs, &shutdown).await?;

    // ---- Pipeline ----
    let dedup = Deduplicator::new();
    let pipeline = Pipeline::new(
        &fetcher,
        &settings.extract,
        &summarizer,
        settings.concurrency,
    );
    let mut records = Vec::new();
    let mut report = RunReport::default();

    for (job, urls) in &resolved {
        let out = pipeline
            .run(&job.query, urls, job.limits, &dedup, &shutdown)
            .await;
        records.extend(out.records);
        report.merge(out.report);
    }

    // ---- Output ----
    let output = args.output.as_deref().map(Path::new);
    json::write_records(&records, output, !args.compact)
        .await
        .inspect_err(|e| error!(error = %e, "Failed to write articles"))?;

    info!(
        candidates = report.candidates,
        emitted = report.emitted,
        summarized = report.summarized,
        summary_failed = report.summary_failed,
        cancelled = report.cancelled,
        unique = dedup.len(),
        duplicates = report.dropped(DropReason::Duplicate),
        dropped = ?report.dropped,
        "Run complete"
    );
    if dedup.is_empty() {
        warn!("No article survived fetching and extraction");
    }
    if let Some(path) = &args.report {
        json::write_report(&report, Path::new(path)).await?;
    }

    Ok(())
}
