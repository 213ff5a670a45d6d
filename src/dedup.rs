//! Cross-worker duplicate suppression.
//!
//! Every article is identified by its canonical URL, normalized so that
//! tracking parameters, scheme, host case, default ports, fragments and
//! trailing slashes don't make one story look like two. The first worker to
//! claim an identity wins; later claims are rejected with the URL that won.

use crate::models::Metadata;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use url::Url;

/// Query parameters that only carry campaign or click tracking.
const TRACKING_PARAMS: &[&str] = &[
    "utm", "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "ref", "ref_src",
    "cmpid", "ocid", "smid", "_ga",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Reduce a URL to its dedup identity.
///
/// - scheme folded to `https`
/// - host lowercased, `www.` kept, default port dropped
/// - fragment dropped
/// - tracking parameters removed, the rest sorted by key
/// - trailing slash removed (the root path collapses to the bare host)
///
/// Strings that don't parse as absolute URLs are trimmed and lowercased.
pub fn normalize_identity(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(url) = Url::parse(raw) else {
        return raw.to_lowercase();
    };
    let Some(host) = url.host_str() else {
        return raw.to_lowercase();
    };

    let mut identity = format!("https://{}", host.to_ascii_lowercase());
    if let Some(port) = url.port() {
        if !matches!((url.scheme(), port), ("http", 80) | ("https", 443)) {
            identity.push_str(&format!(":{port}"));
        }
    }

    let path = url.path().trim_end_matches('/');
    identity.push_str(path);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !params.is_empty() {
        params.sort();
        let query = params
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    urlencoding::encode(k).into_owned()
                } else {
                    format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        identity.push('?');
        identity.push_str(&query);
    }
    identity
}

/// Outcome of claiming an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// First claim. `order` is the admission sequence number, starting at 0.
    Admitted { order: usize },
    /// Already claimed by the request for `first_url`.
    Duplicate { first_url: String },
}

#[derive(Debug)]
struct SeenEntry {
    url: String,
}

/// Thread-safe registry of admitted article identities.
///
/// Shared by reference across every worker in a run, and across queries
/// within a run.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<HashMap<String, SeenEntry>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check-and-insert the identity of `metadata.canonical_url`.
    pub fn admit(&self, metadata: &Metadata, requested_url: &str) -> Admission {
        let identity = normalize_identity(&metadata.canonical_url);
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = seen.get(&identity) {
            debug!(%identity, first = %entry.url, duplicate = %requested_url, "Duplicate article");
            return Admission::Duplicate {
                first_url: entry.url.clone(),
            };
        }
        let order = seen.len();
        let entry = SeenEntry {
            url: requested_url.to_string(),
        };
        seen.insert(identity, entry);
        Admission::Admitted { order }
    }

    /// Number of admitted identities.
    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn meta(canonical: &str) -> Metadata {
        Metadata {
            canonical_url: canonical.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_strips_tracking_and_fragment() {
        let story = "https://example.com/story";
        assert_eq!(normalize_identity("https://example.com/story?utm=1"), story);
        assert_eq!(
            normalize_identity("https://example.com/story?utm=2#top"),
            story
        );
        assert_eq!(
            normalize_identity("https://example.com/story?utm_source=x&fbclid=y&id=7"),
            "https://example.com/story?id=7"
        );
    }

    #[test]
    fn test_normalize_scheme_host_port_slash() {
        assert_eq!(
            normalize_identity("http://Example.COM:80/story/"),
            "https://example.com/story"
        );
        assert_eq!(
            normalize_identity("https://example.com:443/"),
            "https://example.com"
        );
        assert_eq!(
            normalize_identity("https://example.com"),
            "https://example.com"
        );
        assert_eq!(
            normalize_identity("http://example.com:8080/a"),
            "https://example.com:8080/a"
        );
        assert_ne!(
            normalize_identity("https://www.example.com/a"),
            normalize_identity("https://example.com/a")
        );
    }

    #[test]
    fn test_normalize_sorts_params() {
        let sorted = normalize_identity("https://e.com/s?a=1&b=2");
        assert_eq!(normalize_identity("https://e.com/s?b=2&a=1"), sorted);
        assert_eq!(sorted, "https://e.com/s?a=1&b=2");
    }

    #[test]
    fn test_normalize_unparseable() {
        assert_eq!(normalize_identity("  Not A URL "), "not a url");
    }

    #[test]
    fn test_admit_first_wins() {
        let dedup = Deduplicator::new();
        let first = dedup.admit(
            &meta("https://example.com/story"),
            "https://example.com/story?utm=1",
        );
        let second = dedup.admit(
            &meta("https://example.com/story/"),
            "https://example.com/story?utm=2",
        );

        assert_eq!(first, Admission::Admitted { order: 0 });
        assert_eq!(
            second,
            Admission::Duplicate {
                first_url: "https://example.com/story?utm=1".to_string(),
            }
        );
        let third = dedup.admit(&meta("https://example.com/other"), "x");
        assert_eq!(third, Admission::Admitted { order: 1 });
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_concurrent_claims_admit_exactly_one() {
        let dedup = Arc::new(Deduplicator::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let dedup = Arc::clone(&dedup);
                std::thread::spawn(move || {
                    let canonical = format!("https://example.com/story?utm={i}");
                    dedup.admit(&meta(&canonical), &format!("req-{i}"))
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| matches!(a, Admission::Admitted { .. }))
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(dedup.len(), 1);
    }
}
