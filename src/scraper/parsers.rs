//! Positional field scanner for Hatena Bookmark search results.
//!
//! Each field is found by ordered substring search relative to the previous
//! one. The crawl loop only sees the [`ArticleBlockScanner`] contract:
//! `(article | skip | exhausted, next offset)`.

use crate::scraper::cleaner::unescape_html;
use tracing::debug;

/// One article block, before bookmark-count enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedArticle {
    pub url: String,
    pub title: String,
    pub published_date: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// No article marker at or after the start offset.
    Exhausted,
    /// A block was found but its URL is unusable; resume at `next`.
    Skipped { next: Option<usize> },
    /// `next` is `None` when this was the last block of the page.
    Found {
        article: ScannedArticle,
        next: Option<usize>,
    },
}

pub trait ArticleBlockScanner: Send + Sync {
    /// Part of a full results page that holds the article list.
    fn results_region<'h>(&self, html: &'h str) -> &'h str {
        html
    }

    /// Scan for the next article block at or after byte offset `start`.
    /// Any returned offset is strictly greater than `start`.
    fn scan(&self, html: &str, start: usize) -> ScanOutcome;
}

// ── Hatena markup ─────────────────────────────────────────────────────────────

const RESULTS_LIST_MARKER: &str = "class=\"entrysearch-articles\"";
const PAGER_MARKER: &str = "class=\"centerarticle-pager\"";
const ENTRY_TITLE_MARKER: &str = "centerarticle-entry-title";
const NEXT_BLOCK_MARKER: &str = "class=\"bookmark-item";
const DATE_MARKER: &str = "class=\"entry-contents-date\"";
const TAG_LIST_MARKER: &str = "<ul class=\"entrysearch-entry-tags\">";

pub struct HatenaBlockScanner {
    shortener_patterns: Vec<String>,
}

impl HatenaBlockScanner {
    pub fn new(shortener_patterns: Vec<String>) -> Self {
        Self { shortener_patterns }
    }

    fn is_shortened(&self, url: &str) -> bool {
        self.shortener_patterns.iter().any(|p| url.contains(p.as_str()))
    }
}

impl Default for HatenaBlockScanner {
    fn default() -> Self {
        Self::new(vec!["ift.tt".to_string()])
    }
}

impl ArticleBlockScanner for HatenaBlockScanner {
    fn results_region<'h>(&self, html: &'h str) -> &'h str {
        let start = html.find(RESULTS_LIST_MARKER).unwrap_or(0);
        let end = find_from(html, PAGER_MARKER, start).unwrap_or(html.len());
        &html[start..end]
    }

    fn scan(&self, html: &str, start: usize) -> ScanOutcome {
        let Some(anchor) = find_from(html, ENTRY_TITLE_MARKER, start) else {
            return ScanOutcome::Exhausted;
        };

        // The item class precedes the title inside a block, so the first one
        // after our title belongs to the next block.
        let next = find_from(html, NEXT_BLOCK_MARKER, anchor + ENTRY_TITLE_MARKER.len());
        let block = &html[..next.unwrap_or(html.len())];

        let url_span = find_from(block, "<a", anchor)
            .and_then(|a| find_from(block, "\"", a))
            .and_then(|q| find_from(block, "\"", q + 1).map(|end| (q + 1, end)));

        let Some((url_start, url_end)) = url_span else {
            debug!("Article block at {} has no link, skipping", anchor);
            return ScanOutcome::Skipped { next };
        };
        let url = &block[url_start..url_end];
        if url.is_empty() || self.is_shortened(url) {
            debug!("Skipping unusable URL {:?}", url);
            return ScanOutcome::Skipped { next };
        }

        let (title, cursor) = extract_title(block, url_end + 1);
        let (published_date, cursor) = extract_date(block, cursor);
        let tags = extract_tags(block, cursor);

        ScanOutcome::Found {
            article: ScannedArticle {
                url: url.to_string(),
                title,
                published_date,
                tags,
            },
            next,
        }
    }
}

// ── Field helpers ─────────────────────────────────────────────────────────────

fn find_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    haystack.get(from..)?.find(needle).map(|i| i + from)
}

/// Text between the last tag opened inside the anchor (favicon `<img>` or the
/// `<a>` itself) and `</a`.
fn extract_title(block: &str, from: usize) -> (String, usize) {
    let Some(close) = find_from(block, "</a", from) else {
        return (String::new(), from);
    };
    let inner = &block[from..close];
    let text_start = inner.rfind('>').map_or(0, |i| i + 1);
    (unescape_html(&inner[text_start..]), close)
}

/// Verbatim date text; empty when the block has none.
fn extract_date(block: &str, from: usize) -> (String, usize) {
    let span = find_from(block, DATE_MARKER, from)
        .and_then(|m| find_from(block, ">", m + DATE_MARKER.len()))
        .and_then(|gt| find_from(block, "</", gt + 1).map(|lt| (gt + 1, lt)));

    match span {
        Some((start, end)) => (block[start..end].to_string(), end),
        None => (String::new(), from),
    }
}

fn extract_tags(block: &str, from: usize) -> Vec<String> {
    let Some(list_start) = find_from(block, TAG_LIST_MARKER, from) else {
        return Vec::new();
    };
    let list_end = find_from(block, "</ul>", list_start).unwrap_or(block.len());
    let list = &block[list_start + TAG_LIST_MARKER.len()..list_end];

    let mut tags = Vec::new();
    let mut pos = 0;
    while let Some(open) = find_from(list, "<a", pos) {
        let Some(gt) = find_from(list, ">", open + 2) else { break };
        let close = find_from(list, "</a", gt + 1).unwrap_or(list.len());
        let tag = unescape_html(&list[gt + 1..close]);
        if !tag.is_empty() {
            tags.push(tag);
        }
        pos = close;
    }
    tags
}
