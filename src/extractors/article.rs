//! Main-body inference for arbitrary article pages.
//!
//! ### Scoring
//! Every paragraph-like block (`p`, `pre`, `blockquote`) that sits outside
//! boilerplate and has at least `min_paragraph_chars` visible characters
//! contributes `1 + commas + min(len / 100, 3)` to its parent and half of
//! that to its grandparent. Containers start from a tag weight plus ±25 for
//! class/id names that look like content or like page chrome, and the total
//! is scaled by `1 - link_density`.
//!
//! ### Selection
//! Highest score wins; equal scores go to the container that appears first
//! in the document.
//!
//! ### Threshold
//! Text shorter than `min_text_chars` is an [`ExtractionError::TooShort`], not
//! a short article. Cookie walls, paywall stubs and error pages land here.

use crate::error::ExtractionError;
use crate::models::ArticleContent;
use crate::utils::{collapse_whitespace, truncate_chars};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::node::Element;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

static PARAGRAPHS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p, pre, blockquote").expect("static selector"));
static TEXT_BLOCKS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("p, h2, h3, h4, h5, h6, li, blockquote, pre").expect("static selector")
});
static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("a").expect("static selector"));
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("static selector"));
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("static selector"));

static UNLIKELY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:^|[^a-z0-9])(ad|ads|adv|advert\w*|banner|breadcrumbs?|combx|comments?|cookie\w*|consent|disqus|footer|menu|modal|nav\w*|newsletter|outbrain|pager|popup|promo\w*|related|share|sharing|shoutbox|sidebar|skyscraper|social|sponsor\w*|subscribe|taboola|widget)(?:[^a-z0-9]|$)",
    )
    .expect("static regex")
});
static MAYBE_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)article|body|column|content|main|story|entry|post").expect("static regex")
});
static POSITIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)article|body|content|entry|hentry|h-entry|main|page|post|text|blog|story")
        .expect("static regex")
});
static NEGATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)hidden|banner|combx|comment|com-|contact|foot|masthead|media|meta|outbrain|promo|related|scroll|share|shoutbox|sidebar|skyscraper|sponsor|shopping|tags|tool|widget")
        .expect("static regex")
});

const BOILERPLATE_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "form", "script", "style", "noscript", "iframe", "button",
    "svg",
];
const BOILERPLATE_ROLES: &[&str] = &[
    "navigation",
    "banner",
    "contentinfo",
    "complementary",
    "dialog",
    "alert",
];
const BLOCK_TAGS: &[&str] = &["p", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre"];

/// Configuration for article extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Minimum character count for the extracted text (default: 200).
    pub min_text_chars: usize,
    /// Blocks shorter than this do not contribute to scoring (default: 25).
    pub min_paragraph_chars: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 200,
            min_paragraph_chars: 25,
        }
    }
}

/// A container element and its content score.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub element: ElementRef<'a>,
    pub score: f64,
    /// Position in a pre-order walk of the document.
    pub order: usize,
}

/// Extract the main readable text and a display title from `html`.
pub fn extract_article(
    html: &str,
    config: &ExtractConfig,
) -> Result<ArticleContent, ExtractionError> {
    let doc = Html::parse_document(html);
    let candidates = score_candidates(&doc, config);
    let best = candidates.first().ok_or(ExtractionError::NoContent)?;

    let text = collect_text(best.element);
    let found = text.chars().count();
    if found < config.min_text_chars {
        return Err(ExtractionError::TooShort {
            found,
            min: config.min_text_chars,
        });
    }

    let title = single_heading(best.element)
        .or_else(|| document_title(&doc))
        .unwrap_or_else(|| first_line(&text));

    Ok(ArticleContent { title, text })
}

/// Score every container that holds at least one qualifying block.
///
/// Sorted best first; ties keep document order.
pub fn score_candidates<'a>(doc: &'a Html, config: &ExtractConfig) -> Vec<Candidate<'a>> {
    let order: HashMap<_, usize> = doc
        .root_element()
        .descendants()
        .enumerate()
        .map(|(i, node)| (node.id(), i))
        .collect();

    let mut scores: HashMap<_, (ElementRef<'a>, f64)> = HashMap::new();
    for block in doc.select(&PARAGRAPHS) {
        if in_boilerplate(block, None) {
            continue;
        }
        let text = collapse_whitespace(&block.text().collect::<String>());
        let len = text.chars().count();
        if len < config.min_paragraph_chars {
            continue;
        }
        let content = 1.0 + text.matches(',').count() as f64 + (len as f64 / 100.0).min(3.0);

        let Some(parent) = block.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let entry = scores
            .entry(parent.id())
            .or_insert_with(|| (parent, initial_score(parent)));
        entry.1 += content;
        if let Some(grand) = parent.parent().and_then(ElementRef::wrap) {
            let entry = scores
                .entry(grand.id())
                .or_insert_with(|| (grand, initial_score(grand)));
            entry.1 += content / 2.0;
        }
    }

    let mut candidates: Vec<Candidate<'a>> = scores
        .into_values()
        .map(|(element, raw)| Candidate {
            element,
            score: raw * (1.0 - link_density(element)),
            order: order.get(&element.id()).copied().unwrap_or(usize::MAX),
        })
        .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.order.cmp(&b.order)));
    candidates
}

fn initial_score(el: ElementRef) -> f64 {
    let tag = match el.value().name() {
        "article" | "main" => 10.0,
        "div" => 5.0,
        "section" | "pre" | "td" | "blockquote" => 3.0,
        "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" | "form" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    };
    tag + class_weight(el.value())
}

fn class_weight(el: &Element) -> f64 {
    let names = class_and_id(el);
    if names.trim().is_empty() {
        return 0.0;
    }
    let mut weight = 0.0;
    if POSITIVE.is_match(&names) {
        weight += 25.0;
    }
    if NEGATIVE.is_match(&names) {
        weight -= 25.0;
    }
    weight
}

fn class_and_id(el: &Element) -> String {
    format!(
        "{} {}",
        el.attr("class").unwrap_or_default(),
        el.attr("id").unwrap_or_default()
    )
}

fn link_density(el: ElementRef) -> f64 {
    let total = el.text().map(|t| t.chars().count()).sum::<usize>();
    if total == 0 {
        return 0.0;
    }
    let linked = el
        .select(&LINKS)
        .flat_map(|a| a.text())
        .map(|t| t.chars().count())
        .sum::<usize>();
    (linked as f64 / total as f64).min(1.0)
}

/// Navigation, ads, footers, comments and other page chrome.
fn is_boilerplate(el: ElementRef) -> bool {
    let e = el.value();
    let tag = e.name();
    if BOILERPLATE_TAGS.contains(&tag) {
        return true;
    }
    if matches!(tag, "html" | "body" | "article" | "main") {
        return false;
    }
    let role = e.attr("role");
    if role.is_some_and(|r| BOILERPLATE_ROLES.contains(&r)) {
        return true;
    }
    if e.attr("hidden").is_some() || e.attr("aria-hidden") == Some("true") {
        return true;
    }
    let style = e.attr("style");
    if style.is_some_and(|s| s.replace(' ', "").contains("display:none")) {
        return true;
    }
    let names = class_and_id(e);
    UNLIKELY.is_match(&names) && !MAYBE_CONTENT.is_match(&names)
}

/// Whether `el` or an ancestor below `stop` is boilerplate.
fn in_boilerplate(el: ElementRef, stop: Option<ElementRef>) -> bool {
    if is_boilerplate(el) {
        return true;
    }
    for node in el.ancestors() {
        if stop.is_some_and(|s| s.id() == node.id()) {
            return false;
        }
        if ElementRef::wrap(node).is_some_and(is_boilerplate) {
            return true;
        }
    }
    false
}

fn has_block_ancestor(el: ElementRef, container: ElementRef) -> bool {
    for node in el.ancestors() {
        if node.id() == container.id() {
            return false;
        }
        if ElementRef::wrap(node).is_some_and(|a| BLOCK_TAGS.contains(&a.value().name())) {
            return true;
        }
    }
    false
}

fn collect_text(container: ElementRef) -> String {
    let blocks: Vec<String> = container
        .select(&TEXT_BLOCKS)
        .filter(|el| !in_boilerplate(*el, Some(container)) && !has_block_ancestor(*el, container))
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect();

    if blocks.is_empty() {
        return collapse_whitespace(&container.text().collect::<String>());
    }
    blocks.join("\n\n")
}

fn single_heading(container: ElementRef) -> Option<String> {
    let mut headings = container.select(&H1);
    let first = headings.next()?;
    if headings.next().is_some() {
        return None;
    }
    Some(collapse_whitespace(&first.text().collect::<String>())).filter(|t| !t.is_empty())
}

fn document_title(doc: &Html) -> Option<String> {
    doc.select(&TITLE)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn first_line(text: &str) -> String {
    truncate_chars(text.lines().next().unwrap_or_default(), 120).to_string()
}
