//! JSON output for article records and the run report.
//!
//! Records go to the `--output` file when one is given, otherwise to stdout
//! so the tool can sit in a shell pipeline. Logs always go to stderr.

use crate::models::ArticleRecord;
use crate::pipeline::RunReport;
use crate::utils::ensure_parent_dir;
use serde::Serialize;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncWriteExt, stdout};
use tracing::{error, info, instrument};

fn to_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}

/// Write `records` as a JSON array to `path`, or to stdout when `path` is `None`.
///
/// Parent directories of `path` are created as needed.
#[instrument(level = "info", skip_all, fields(records = records.len(), path = ?path))]
pub async fn write_records(
    records: &[ArticleRecord],
    path: Option<&Path>,
    pretty: bool,
) -> Result<(), Box<dyn Error>> {
    let mut json = to_json(records, pretty)?;
    json.push('\n');

    match path {
        Some(path) => {
            write_file(path, &json).await?;
            info!(path = %path.display(), "Wrote articles");
        }
        None => {
            let mut out = stdout();
            out.write_all(json.as_bytes()).await?;
            out.flush().await?;
        }
    }
    Ok(())
}

/// Write the run report as pretty JSON to `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_report(report: &RunReport, path: &Path) -> Result<(), Box<dyn Error>> {
    let json = to_json(report, true)?;
    write_file(path, &json).await?;
    info!("Wrote run report");
    Ok(())
}

async fn write_file(path: &Path, contents: &str) -> Result<(), Box<dyn Error>> {
    if let Err(e) = ensure_parent_dir(path).await {
        error!(path = %path.display(), error = %e, "Failed to create output dir");
        return Err(e.into());
    }
    fs::write(path, contents).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AiSummary, Crawl, Metadata};
    use crate::pipeline::DropReason;
    use chrono::{TimeZone, Utc};

    fn record(url: &str, summary: Option<AiSummary>) -> ArticleRecord {
        ArticleRecord {
            url: url.to_string(),
            crawl: Crawl {
                loaded_url: url.to_string(),
                loaded_time: Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap(),
                http_status_code: 200,
            },
            ai_summary: summary,
            metadata: Metadata {
                canonical_url: url.to_string(),
                ..Default::default()
            },
            title: "Title".into(),
            text: "Body".into(),
        }
    }

    #[tokio::test]
    async fn test_write_records_pretty_to_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/digest.json");
        let summary = AiSummary {
            title: "T".into(),
            summary: "- s".into(),
            score: 90,
        };
        let records = vec![
            record("https://example.com/a", Some(summary)),
            record("https://example.com/b", None),
        ];

        write_records(&records, Some(&path), true).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("[\n  {"));
        let parsed: Vec<ArticleRecord> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, records);

        let values: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(values[0]["aiSummary"]["score"], 90);
        assert!(values[1].get("aiSummary").is_none());
        assert_eq!(values[0]["crawl"]["httpStatusCode"], 200);
    }

    #[tokio::test]
    async fn test_write_records_compact_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        write_records(&[], Some(&path), false).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]\n");

        let one = dir.path().join("one.json");
        write_records(&[record("https://example.com/a", None)], Some(&one), false)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&one).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut report = RunReport {
            candidates: 4,
            attempted: 4,
            emitted: 3,
            ..Default::default()
        };
        report.dropped.insert(DropReason::Duplicate, 1);

        write_report(&report, &path).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["emitted"], 3);
        assert_eq!(value["dropped"]["duplicate"], 1);
    }
}
