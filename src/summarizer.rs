//! Article summarization behind the [`Summarize`] seam.
//!
//! Two backends:
//! - [`LlmSummarizer`]: prompts a chat model through any [`AskAsync`]
//!   (in production `RetryAsk<AwfulAsk>`) and parses its JSON reply
//! - [`ExtractiveSummarizer`]: picks the sentences that overlap the query
//!   most, offline and deterministic
//!
//! A summarization failure never drops an article; the pipeline emits the
//! record without `aiSummary`.

use crate::api::{AskAsync, AwfulAsk, RetryAsk};
use crate::config::ConfigError;
use crate::error::SummarizationError;
use crate::models::AiSummary;
use crate::utils::{looks_truncated, truncate_chars, truncate_for_log};
use awful_aj::{config, config_dir, template};
use clap::ValueEnum;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("static regex"));

const TITLE_MAX_CHARS: usize = 120;

/// Turns article text into an [`AiSummary`].
pub trait Summarize {
    /// Summarize `text` for a reader interested in `query`.
    async fn summarize(&self, text: &str, query: &str) -> Result<AiSummary, SummarizationError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SummarizerBackend {
    /// Chat model through `awful_aj`.
    #[default]
    Llm,
    /// Query-overlap sentence extraction.
    Extractive,
}

/// Summarization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub backend: SummarizerBackend,
    /// `awful_aj` chat template holding the system prompt.
    pub template: String,
    /// `awful_aj` config.yaml; defaults to the one in the `awful_aj` config dir.
    pub config_path: Option<String>,
    /// Article text beyond this many characters is not sent to the model.
    pub max_input_chars: usize,
    /// Requested upper bound on the summary length.
    pub max_output_chars: usize,
    /// Sentences kept by the extractive backend.
    pub max_sentences: usize,
    pub max_retries: usize,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
    /// Deadline for one model request.
    pub timeout_ms: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            backend: SummarizerBackend::Llm,
            template: "news_summarizer".to_string(),
            config_path: None,
            max_input_chars: 12_000,
            max_output_chars: 1_200,
            max_sentences: 3,
            max_retries: 5,
            backoff_base_ms: 1_000,
            max_backoff_ms: 30_000,
            jitter_ms: 250,
            timeout_ms: 120_000,
        }
    }
}

/// The summarizer selected by configuration.
#[derive(Debug)]
pub enum AnySummarizer {
    Llm(LlmSummarizer<RetryAsk<AwfulAsk>>),
    Extractive(ExtractiveSummarizer),
}

impl AnySummarizer {
    pub async fn from_config(config: &SummarizerConfig) -> Result<Self, ConfigError> {
        match config.backend {
            SummarizerBackend::Extractive => {
                Ok(Self::Extractive(ExtractiveSummarizer::new(config.max_sentences)))
            }
            SummarizerBackend::Llm => {
                Ok(Self::Llm(LlmSummarizer::from_awful_config(config).await?))
            }
        }
    }
}

impl Summarize for AnySummarizer {
    async fn summarize(&self, text: &str, query: &str) -> Result<AiSummary, SummarizationError> {
        match self {
            Self::Llm(s) => s.summarize(text, query).await,
            Self::Extractive(s) => s.summarize(text, query).await,
        }
    }
}

/// Summaries written by a chat model.
#[derive(Debug)]
pub struct LlmSummarizer<A> {
    asker: A,
    max_input_chars: usize,
    max_output_chars: usize,
}

impl<A> LlmSummarizer<A>
where
    A: AskAsync<Response = String>,
{
    pub fn new(asker: A, max_input_chars: usize, max_output_chars: usize) -> Self {
        Self {
            asker,
            max_input_chars,
            max_output_chars,
        }
    }

    fn prompt(&self, text: &str, query: &str) -> String {
        let text = truncate_chars(text, self.max_input_chars);
        format!(
            "Query: {query}\n\n\
             Summarize the article below for a reader interested in the query.\n\
             Respond with a single JSON object and nothing else:\n\
             {{\"title\": \"<headline, at most {TITLE_MAX_CHARS} characters>\", \
             \"summary\": \"<markdown bullet list, at most {} characters>\", \
             \"score\": <integer 0-100, relevance to the query>}}\n\n\
             Article:\n{text}",
            self.max_output_chars
        )
    }

    async fn ask(&self, prompt: &str) -> Result<String, SummarizationError> {
        self.asker
            .ask(prompt)
            .await
            .map_err(|e| SummarizationError::Exhausted(e.to_string()))
    }
}

impl LlmSummarizer<RetryAsk<AwfulAsk>> {
    /// Load the `awful_aj` config and chat template and wrap the client in retries.
    pub async fn from_awful_config(settings: &SummarizerConfig) -> Result<Self, ConfigError> {
        let chat = template::load_template(&settings.template)
            .await
            .map_err(|e| {
                ConfigError::LoadFailed(format!("chat template {:?}: {e}", settings.template))
            })?;
        info!(template = %settings.template, "Loaded template");

        let conf_file = match &settings.config_path {
            Some(path) => PathBuf::from(path),
            None => config_dir()
                .map_err(|e| ConfigError::LoadFailed(format!("awful_aj config dir: {e}")))?
                .join("config.yaml"),
        };
        let config_path = conf_file.to_str().ok_or_else(|| ConfigError::Invalid {
            field: "summarizer.config_path".into(),
            reason: "not a valid UTF-8 path".into(),
        })?;
        let aj = config::load_config(config_path)
            .map_err(|e| ConfigError::LoadFailed(format!("{config_path}: {e}")))?;
        info!(config_path, "Loaded configuration");

        let timeout = Duration::from_millis(settings.timeout_ms);
        let client = AwfulAsk::new(Arc::new(aj), Arc::new(chat), timeout);
        let base_delay = Duration::from_millis(settings.backoff_base_ms);
        let asker = RetryAsk::new(client, settings.max_retries, base_delay)
            .with_max_delay(Duration::from_millis(settings.max_backoff_ms))
            .with_jitter(Duration::from_millis(settings.jitter_ms));
        Ok(Self::new(asker, settings.max_input_chars, settings.max_output_chars))
    }
}

impl<A> Summarize for LlmSummarizer<A>
where
    A: AskAsync<Response = String>,
{
    #[instrument(level = "info", skip_all, fields(%query, chars = text.len()))]
    async fn summarize(&self, text: &str, query: &str) -> Result<AiSummary, SummarizationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SummarizationError::Empty);
        }
        let prompt = self.prompt(text, query);
        let reply = self.ask(&prompt).await?;

        match parse_reply(&reply) {
            Ok(summary) => Ok(summary),
            // If the reply was cut off, re-ask ONCE
            Err(ReplyError::Truncated(e)) => {
                warn!(
                    error = %e,
                    reply = %truncate_for_log(&reply, 200),
                    "EOF while parsing; re-asking once"
                );
                let retry = self.ask(&prompt).await?;
                parse_reply(&retry)
                    .map_err(|e| SummarizationError::Malformed(e.to_string()))
            }
            Err(ReplyError::Invalid(e)) => {
                debug!(reply = %truncate_for_log(&reply, 200), "Unusable model reply");
                Err(SummarizationError::Malformed(e))
            }
        }
    }
}

#[derive(Debug)]
enum ReplyError {
    Truncated(String),
    Invalid(String),
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyError::Truncated(e) => write!(f, "truncated reply: {e}"),
            ReplyError::Invalid(e) => f.write_str(e),
        }
    }
}

/// Parse a `{title, summary, score}` reply, tolerating code fences,
/// surrounding prose, list summaries and loosely typed scores.
fn parse_reply(reply: &str) -> Result<AiSummary, ReplyError> {
    let body = strip_fences(reply);
    let start = body
        .find('{')
        .ok_or_else(|| ReplyError::Invalid("reply contains no JSON object".into()))?;
    let json = match body.rfind('}') {
        Some(end) if end > start => &body[start..=end],
        _ => &body[start..],
    };

    let value: Value = serde_json::from_str(json).map_err(|e| {
        if looks_truncated(&e) {
            ReplyError::Truncated(e.to_string())
        } else {
            ReplyError::Invalid(e.to_string())
        }
    })?;

    let title = value
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ReplyError::Invalid("missing title".into()))?;
    let summary = match value.get("summary") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .filter_map(Value::as_str)
            .map(|item| format!("- {}", item.trim().trim_start_matches(['-', '*']).trim()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return Err(ReplyError::Invalid("missing summary".into())),
    };
    let score = value
        .get("score")
        .and_then(score_value)
        .ok_or_else(|| ReplyError::Invalid("missing or non-numeric score".into()))?;

    Ok(AiSummary {
        title: truncate_chars(title, TITLE_MAX_CHARS).to_string(),
        summary,
        score,
    })
}

fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json"). The body may follow it on the same line.
    let body = rest.find(['\n', '{', '[']).map_or("", |at| &rest[at..]);
    body.trim().trim_end_matches("```").trim()
}

fn score_value(v: &Value) -> Option<u8> {
    let raw = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(0.0, 100.0) as u8)
}

/// Offline summaries built from the article's own sentences.
///
/// Each sentence scores `overlap / sqrt(tokens)`, where `overlap` counts its
/// tokens that also occur in the query. The best `max_sentences` are kept in
/// document order; when nothing overlaps, the opening sentences are used.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    max_sentences: usize,
}

impl ExtractiveSummarizer {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }
}

impl Summarize for ExtractiveSummarizer {
    async fn summarize(&self, text: &str, query: &str) -> Result<AiSummary, SummarizationError> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Err(SummarizationError::Empty);
        }

        let query_tokens: HashSet<String> = tokenize(query).collect();
        let scores: Vec<f64> = sentences
            .iter()
            .map(|s| sentence_score(s, &query_tokens))
            .collect();

        let mut ranked: Vec<usize> = (0..sentences.len()).collect();
        ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let mut selected: Vec<usize> = if scores.iter().all(|&s| s <= 0.0) {
            (0..sentences.len().min(self.max_sentences)).collect()
        } else {
            ranked.into_iter().take(self.max_sentences).collect()
        };
        selected.sort_unstable();

        let summary = selected
            .iter()
            .map(|&i| format!("- {}", sentences[i]))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(AiSummary {
            title: truncate_chars(sentences[0], TITLE_MAX_CHARS).to_string(),
            summary,
            score: overall_score(&scores),
        })
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD.find_iter(text).map(|m| m.as_str().to_lowercase())
}

/// Split after `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() && matches!(prev, Some('.' | '!' | '?')) {
            let sentence = text[start..i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i;
        }
        prev = Some(c);
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn sentence_score(sentence: &str, query_tokens: &HashSet<String>) -> f64 {
    let tokens: Vec<String> = tokenize(sentence).collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let overlap = tokens.iter().filter(|t| query_tokens.contains(*t)).count();
    overlap as f64 / (tokens.len() as f64).sqrt()
}

/// `50 + 50 * avg / max`, or 40 when no sentence overlaps the query.
fn overall_score(scores: &[f64]) -> u8 {
    let max = scores.iter().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return 40;
    }
    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
    (50.0 + 50.0 * (avg / max).min(1.0)) as u8
}
