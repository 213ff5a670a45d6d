//! Utility functions for string handling, retry timing, and file system checks.
//!
//! This module provides helper functions used throughout the application:
//! - String truncation for logging and for model context limits
//! - Whitespace collapsing for text pulled out of HTML
//! - Exponential backoff delays shared by the fetcher and the model client
//! - JSON error detection for handling LLM response truncation
//! - File system preparation for the output file

use rand::{Rng, rng};
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut at `max` bytes (rounded down to a character
/// boundary) with an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Keep at most `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Collapse every run of whitespace into a single space and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Delay before retry number `attempt` (0-based).
///
/// ```text
/// delay = min(base * 2^attempt, max) + random_jitter(0..=jitter)
/// ```
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration, jitter: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    let delay = base.saturating_mul(factor).min(max);
    let jitter_ms = jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rng().random_range(0..=jitter_ms))
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the LLM response is cut off (e.g., due to token limits), the
/// resulting JSON will fail to parse with an EOF error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Make sure the parent directory of `path` exists.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).await?;
            debug!(parent = %parent.display(), "Output directory ready");
            Ok(())
        }
        _ => Ok(()),
    }
}
