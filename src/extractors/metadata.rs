//! Page metadata from head tags and structured data.
//!
//! Each field is taken from the first source that has it, in this order:
//!
//! | Priority | Source |
//! |----------|--------|
//! | 1 | `<link rel="canonical">` (canonical URL only) |
//! | 2 | Open Graph / `article:*` properties |
//! | 3 | JSON-LD (`application/ld+json`) Article-like nodes |
//! | 4 | Generic meta tags (`name=`, Twitter cards, Dublin Core) |
//! | 5 | Document `<title>`, `<html lang>`, `<time datetime>` |
//!
//! Extraction never fails; missing fields stay `None` (or empty for keywords).

use crate::models::Metadata;
use crate::utils::collapse_whitespace;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

static META: Lazy<Selector> = Lazy::new(|| Selector::parse("meta").expect("static selector"));
static CANONICAL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("link[rel~=canonical][href]").expect("static selector"));
static TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("head title, title").expect("static selector"));
static HTML_TAG: Lazy<Selector> = Lazy::new(|| Selector::parse("html").expect("static selector"));
static LD_JSON: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("static selector")
});
static TIME_TAG: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time[datetime]").expect("static selector"));
static AUTHOR_LINK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[rel="author"], [itemprop="author"]"#).expect("static selector")
});

/// Meta tags that carry the publish time, in lookup order.
const PUBLISHED_KEYS: &[&str] = &[
    "article:published_time",
    "og:published_time",
    "pubdate",
    "publishdate",
    "publish-date",
    "date",
    "dc.date",
    "dc.date.issued",
    "dcterms.created",
    "sailthru.date",
];

/// Meta tags naming the author, after the Open Graph and JSON-LD sources.
const AUTHOR_KEYS: &[&str] = &[
    "author",
    "byl",
    "dc.creator",
    "parsely-author",
    "sailthru.author",
];

/// Timestamp layouts that carry an offset.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%z",
];

/// Timestamp layouts read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Extract best-effort metadata from `html`.
///
/// `fallback_url` is used as the canonical URL when the page declares none,
/// and as the base for resolving relative canonical/image links.
pub fn extract_metadata(html: &str, fallback_url: &str) -> Metadata {
    let doc = Html::parse_document(html);
    let meta = MetaTags::collect(&doc);
    let ld = LinkedData::collect(&doc);
    let base = Url::parse(fallback_url).ok();

    let canonical_url = doc
        .select(&CANONICAL)
        .filter_map(|el| el.value().attr("href"))
        .chain(meta.get("og:url"))
        .find_map(|href| resolve(base.as_ref(), href))
        .unwrap_or_else(|| fallback_url.to_string());

    let document_title = doc
        .select(&TITLE)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let title = meta
        .first(&["og:title"])
        .or_else(|| ld.headline.clone())
        .or_else(|| meta.first(&["twitter:title", "title", "dc.title"]))
        .or(document_title);

    let description = meta
        .first(&["og:description"])
        .or_else(|| ld.description.clone())
        .or_else(|| meta.first(&["description", "twitter:description", "dc.description"]));

    let image = meta
        .first(&["og:image", "og:image:url", "og:image:secure_url"])
        .or_else(|| ld.image.clone())
        .or_else(|| meta.first(&["twitter:image", "twitter:image:src", "thumbnail"]))
        .map(|src| resolve(base.as_ref(), &src).unwrap_or(src));

    let source = meta
        .first(&["og:site_name"])
        .or_else(|| ld.publisher.clone())
        .or_else(|| meta.first(&["publisher", "application-name", "twitter:site"]))
        .or_else(|| {
            Url::parse(&canonical_url)
                .ok()
                .and_then(|u| u.host_str().map(host_label))
        });

    let author = meta
        .first(&["article:author", "og:article:author"])
        .filter(|a| !a.starts_with("http"))
        .or_else(|| ld.author.clone())
        .or_else(|| meta.first(AUTHOR_KEYS))
        .or_else(|| {
            doc.select(&AUTHOR_LINK)
                .map(|el| collapse_whitespace(&el.text().collect::<String>()))
                .find(|t| !t.is_empty())
        })
        .map(|a| {
            a.trim_start_matches("By ")
                .trim_start_matches("by ")
                .to_string()
        });

    let keywords = keyword_sources(&meta, &ld);

    let published_raw = PUBLISHED_KEYS
        .iter()
        .find_map(|key| meta.get(key).map(str::to_string))
        .or_else(|| ld.date_published.clone())
        .or_else(|| {
            doc.select(&TIME_TAG)
                .filter_map(|el| el.value().attr("datetime"))
                .map(str::to_string)
                .next()
        });
    let published = published_raw.as_deref().and_then(|raw| {
        let parsed = parse_timestamp(raw);
        if parsed.is_none() {
            debug!(raw, "Unparsable publish timestamp");
        }
        parsed
    });

    let language_code = doc
        .select(&HTML_TAG)
        .next()
        .and_then(|el| {
            let el = el.value();
            el.attr("lang").or_else(|| el.attr("xml:lang"))
        })
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .or_else(|| meta.first(&["content-language", "language", "dc.language"]))
        .or_else(|| meta.first(&["og:locale"]).map(|l| l.replace('_', "-")))
        .or_else(|| ld.in_language.clone());

    Metadata {
        canonical_url,
        title,
        description,
        image,
        source,
        author,
        keywords,
        published,
        language_code,
    }
}

/// Parse a publish timestamp in any of the common formats.
///
/// Values without an offset are taken as UTC. Returns `None` rather than
/// guessing when nothing matches.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

/// Split a delimited keyword list, keeping first occurrences in order.
pub fn split_keywords(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .unique_by(|k| k.to_lowercase())
        .collect()
}

fn keyword_sources(meta: &MetaTags, ld: &LinkedData) -> Vec<String> {
    if let Some(raw) = meta.first(&["keywords", "news_keywords"]) {
        return split_keywords(&raw);
    }
    if let Some(tags) = meta.all.get("article:tag") {
        return split_keywords(&tags.join(","));
    }
    if !ld.keywords.is_empty() {
        return split_keywords(&ld.keywords.join(","));
    }
    Vec::new()
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match base {
        Some(base) => base.join(href).ok().map(String::from),
        None => Url::parse(href).ok().map(String::from),
    }
}

fn host_label(host: &str) -> String {
    host.trim_start_matches("www.").to_string()
}

/// All `<meta>` values keyed by lower-cased `property`/`name`/`itemprop`/`http-equiv`.
struct MetaTags {
    all: HashMap<String, Vec<String>>,
}

impl MetaTags {
    fn collect(doc: &Html) -> Self {
        let mut all: HashMap<String, Vec<String>> = HashMap::new();
        for el in doc.select(&META) {
            let attrs = el.value();
            let content = attrs.attr("content").map(collapse_whitespace);
            let Some(content) = content.filter(|c| !c.is_empty()) else {
                continue;
            };
            for key_attr in ["property", "name", "itemprop", "http-equiv"] {
                if let Some(key) = attrs.attr(key_attr) {
                    all.entry(key.trim().to_lowercase())
                        .or_default()
                        .push(content.clone());
                }
            }
        }
        Self { all }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.all
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.get(k)).map(str::to_string)
    }
}

/// Fields of the first Article-like JSON-LD node on the page.
#[derive(Debug, Default)]
struct LinkedData {
    headline: Option<String>,
    description: Option<String>,
    image: Option<String>,
    author: Option<String>,
    publisher: Option<String>,
    keywords: Vec<String>,
    date_published: Option<String>,
    in_language: Option<String>,
}

impl LinkedData {
    fn collect(doc: &Html) -> Self {
        for script in doc.select(&LD_JSON) {
            let raw = script.text().collect::<String>();
            let raw = raw
                .trim()
                .trim_start_matches("<![CDATA[")
                .trim_end_matches("]]>")
                .trim();
            let Ok(value) = serde_json::from_str::<Value>(raw) else {
                continue;
            };
            if let Some(node) = find_article_node(&value) {
                return Self::from_node(node);
            }
        }
        Self::default()
    }

    fn from_node(node: &Value) -> Self {
        Self {
            headline: text_field(node, "headline").or_else(|| text_field(node, "name")),
            description: text_field(node, "description"),
            image: node.get("image").and_then(first_url),
            author: node.get("author").and_then(names),
            publisher: node.get("publisher").and_then(names),
            keywords: match node.get("keywords") {
                Some(Value::String(s)) => vec![s.clone()],
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            },
            date_published: text_field(node, "datePublished")
                .or_else(|| text_field(node, "dateCreated")),
            in_language: text_field(node, "inLanguage"),
        }
    }
}

fn is_article_type(node: &Value) -> bool {
    let article_like = |t: &str| {
        t.ends_with("Article") || matches!(t, "BlogPosting" | "LiveBlogPosting" | "Report")
    };
    match node.get("@type") {
        Some(Value::String(t)) => article_like(t),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).any(article_like),
        _ => false,
    }
}

fn find_article_node(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_article_node),
        Value::Object(obj) => {
            if is_article_type(value) {
                return Some(value);
            }
            obj.get("@graph").and_then(find_article_node)
        }
        _ => None,
    }
}

fn text_field(node: &Value, key: &str) -> Option<String> {
    node.get(key)
        .and_then(Value::as_str)
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
}

fn first_url(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Array(items) => items.iter().find_map(first_url),
        Value::Object(_) => value.get("url").and_then(first_url),
        _ => None,
    }
}

fn names(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(collapse_whitespace(s)).filter(|s| !s.is_empty()),
        Value::Object(_) => text_field(value, "name"),
        Value::Array(items) => {
            let joined = items.iter().filter_map(names).join(", ");
            Some(joined).filter(|s| !s.is_empty())
        }
        _ => None,
    }
}
