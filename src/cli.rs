//! Command-line interface definitions for news_digest.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Every option overrides the matching field of the settings file; options
//! left out keep the file's value (or the built-in default).

use crate::search::ProviderKind;
use crate::summarizer::SummarizerBackend;
use clap::Parser;

/// Command-line arguments for the news_digest application.
///
/// # Examples
///
/// ```sh
/// # Search, extract and summarize the top 10 stories for a query
/// news_digest -q "city council transit budget" -o ./out/digest.json
///
/// # Several queries from a file, offline summaries, run report
/// news_digest -i queries.json --summarizer extractive --report ./out/report.json
///
/// # Known URLs, no search
/// news_digest -q "transit" -u https://example.com/story -u https://example.org/other
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Search query (also the relevance context for summaries)
    #[arg(short, long)]
    pub query: Option<String>,

    /// JSON file with a `queries` array, one job per entry
    #[arg(short, long)]
    pub input: Option<String>,

    /// Seed URL to process instead of searching (repeatable)
    #[arg(short = 'u', long = "url")]
    pub urls: Vec<String>,

    /// File with one seed URL per line (`#` starts a comment)
    #[arg(long)]
    pub urls_file: Option<String>,

    /// Write the JSON array here instead of stdout
    #[arg(short, long)]
    pub output: Option<String>,

    /// Optional path to a settings YAML file
    #[arg(short, long, env = "NEWS_DIGEST_CONFIG")]
    pub config: Option<String>,

    /// Maximum number of candidate URLs per query
    #[arg(short, long)]
    pub max_articles: Option<usize>,

    /// Drop articles published more than this many hours ago
    #[arg(long)]
    pub since_hours: Option<u64>,

    /// Language code for search, e.g. `en`
    #[arg(long)]
    pub language: Option<String>,

    /// Country code for search, e.g. `us`
    #[arg(long)]
    pub country: Option<String>,

    /// Number of URLs processed at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Stop the whole run after this many seconds and keep what finished
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Summarization backend
    #[arg(long, value_enum, env = "NEWS_DIGEST_SUMMARIZER")]
    pub summarizer: Option<SummarizerBackend>,

    /// Search provider used to find candidate URLs
    #[arg(long, value_enum)]
    pub search_provider: Option<ProviderKind>,

    /// Write the run report (counts per outcome) to this file
    #[arg(long)]
    pub report: Option<String>,

    /// Emit compact JSON instead of pretty-printed
    #[arg(long)]
    pub compact: bool,
}
