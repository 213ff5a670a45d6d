//! Google News RSS search feed.
//!
//! `hl`, `gl` and `ceid` pin the edition so results follow the requested
//! language and country. Item links are Google News article URLs; the
//! fetcher follows their redirects to the publisher.

use super::{SearchProvider, SearchQuery, fetch_body, non_empty};
use crate::error::SearchError;
use crate::fetcher::Fetcher;
use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, instrument};

pub const ENDPOINT: &str = "https://news.google.com/rss/search";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug)]
pub struct GoogleNews<'a> {
    fetcher: &'a Fetcher,
    endpoint: String,
}

impl<'a> GoogleNews<'a> {
    pub fn new(fetcher: &'a Fetcher, endpoint: &str) -> Self {
        Self {
            fetcher,
            endpoint: endpoint.to_string(),
        }
    }

    fn search_url(&self, query: &SearchQuery) -> String {
        let language = query.language.to_lowercase();
        let country = query.country.to_uppercase();
        format!(
            "{}?q={}&hl={language}-{country}&gl={country}&ceid={country}:{language}",
            self.endpoint,
            urlencoding::encode(&query.query)
        )
    }
}

impl SearchProvider for GoogleNews<'_> {
    #[instrument(level = "debug", skip_all, fields(query = %query.query))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, SearchError> {
        let xml = fetch_body(self.fetcher, &self.search_url(query)).await?;
        let urls = parse_feed(&xml, query.max_results)?;
        debug!(found = urls.len(), "Parsed Google News feed");
        non_empty(urls, query)
    }
}

/// Item links from an RSS document, in feed order, without duplicates.
pub fn parse_feed(xml: &str, max: usize) -> Result<Vec<String>, SearchError> {
    let rss: Rss = quick_xml::de::from_str(xml)
        .map_err(|e| SearchError::Parse(e.to_string()))?;
    Ok(rss
        .channel
        .items
        .into_iter()
        .filter_map(|item| item.link)
        .map(|link| link.trim().to_string())
        .filter(|link| link.starts_with("http://") || link.starts_with("https://"))
        .unique()
        .take(max)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Route, TestServer, fast_fetch_config, search_query};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>"transit" - Google News</title>
    <link>https://news.google.com/search?q=transit</link>
    <item>
      <title>Budget passes - Example News</title>
      <link>https://news.google.com/rss/articles/AAA?oc=5</link>
      <guid isPermaLink="false">AAA</guid>
      <pubDate>Mon, 06 Jan 2025 10:00:00 GMT</pubDate>
      <source url="https://example.com">Example News</source>
    </item>
    <item>
      <title>No link here</title>
    </item>
    <item>
      <title>Budget passes - Example News</title>
      <link>https://news.google.com/rss/articles/AAA?oc=5</link>
    </item>
    <item>
      <title>Riders react</title>
      <link> https://news.google.com/rss/articles/BBB?oc=5 </link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed() {
        assert_eq!(
            parse_feed(FEED, 10).unwrap(),
            vec![
                "https://news.google.com/rss/articles/AAA?oc=5".to_string(),
                "https://news.google.com/rss/articles/BBB?oc=5".to_string(),
            ]
        );
        assert_eq!(parse_feed(FEED, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        let blocked = parse_feed("<html><body>blocked</body>", 5);
        assert!(matches!(blocked, Err(SearchError::Parse(_))));
    }

    #[test]
    fn test_search_url_edition() {
        let fetcher = Fetcher::new(fast_fetch_config()).unwrap();
        let gn = GoogleNews::new(&fetcher, ENDPOINT);
        let query = search_query("city council", "en", "gb", 5);
        assert_eq!(
            gn.search_url(&query),
            "https://news.google.com/rss/search?q=city%20council&hl=en-GB&gl=GB&ceid=GB:en"
        );
    }

    #[tokio::test]
    async fn test_search_against_local_server() {
        let server = TestServer::start(vec![("/rss/search", Route::page(200, FEED))]).await;
        let fetcher = Fetcher::new(fast_fetch_config()).unwrap();
        let query = search_query("transit", "en", "us", 5);

        let provider = GoogleNews::new(&fetcher, &server.url("/rss/search"));
        let urls = provider.search(&query).await.unwrap();
        assert_eq!(urls.len(), 2);
    }
}
