//! DuckDuckGo HTML search.
//!
//! Result links point at a `duckduckgo.com/l/?uddg=<target>` redirect; the
//! target is decoded here so the pipeline fetches the article directly.
//! Sponsored results (`result--ad`) are skipped.

use super::{SearchProvider, SearchQuery, fetch_body, non_empty};
use crate::error::SearchError;
use crate::fetcher::Fetcher;
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

pub const ENDPOINT: &str = "https://html.duckduckgo.com/html/";

static RESULT_LINKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.result__a").expect("static selector"));

#[derive(Debug)]
pub struct DuckDuckGo<'a> {
    fetcher: &'a Fetcher,
    endpoint: String,
}

impl<'a> DuckDuckGo<'a> {
    pub fn new(fetcher: &'a Fetcher, endpoint: &str) -> Self {
        Self {
            fetcher,
            endpoint: endpoint.to_string(),
        }
    }

    fn search_url(&self, query: &SearchQuery) -> Result<String, SearchError> {
        let country = query.country.to_lowercase();
        let language = query.language.to_lowercase();
        let region = format!("{country}-{language}");
        let params = [("q", query.query.as_str()), ("kl", region.as_str())];
        let url = Url::parse_with_params(&self.endpoint, &params)
            .map_err(|e| SearchError::Parse(format!("bad endpoint {:?}: {e}", self.endpoint)))?;
        Ok(url.into())
    }
}

impl SearchProvider for DuckDuckGo<'_> {
    #[instrument(level = "debug", skip_all, fields(query = %query.query))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, SearchError> {
        let url = self.search_url(query)?;
        let html = fetch_body(self.fetcher, &url).await?;
        let urls = parse_results(&html, query.max_results);
        debug!(found = urls.len(), "Parsed DuckDuckGo results");
        non_empty(urls, query)
    }
}

/// Article URLs from a results page, in rank order, without duplicates.
pub fn parse_results(html: &str, max: usize) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.select(&RESULT_LINKS)
        .filter(|a| !is_sponsored(*a))
        .filter_map(|a| a.value().attr("href"))
        .filter_map(resolve_link)
        .unique()
        .take(max)
        .collect()
}

fn is_sponsored(link: ElementRef) -> bool {
    link.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|el| el.value().classes().any(|c| c == "result--ad"))
}

/// Decode the `uddg` redirect, or accept a direct http(s) link.
fn resolve_link(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();

    let target = if host.ends_with("duckduckgo.com") {
        let (_, target) = url.query_pairs().find(|(k, _)| k == "uddg")?;
        Url::parse(&target).ok()?
    } else {
        url
    };

    let target_host = target.host_str()?.to_ascii_lowercase();
    let web = matches!(target.scheme(), "http" | "https");
    if !web || target_host.ends_with("duckduckgo.com") {
        return None;
    }
    Some(target.into())
}
