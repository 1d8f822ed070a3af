use crate::models::Article;
use crate::scraper::BookmarkCountSource;
use crate::scraper::cleaner::normalize_bookmark_count;
use crate::scraper::parsers::{ArticleBlockScanner, ScanOutcome, ScannedArticle};
use tracing::{debug, warn};

/// Walk every article block on a page, in page order.
///
/// Terminates for any input: the scanner only ever hands back offsets past
/// the one it was given, and a non-advancing offset ends the walk anyway.
pub fn scan_page(scanner: &dyn ArticleBlockScanner, html: &str) -> Vec<ScannedArticle> {
    if html.is_empty() {
        return Vec::new();
    }

    let region = scanner.results_region(html);
    let mut articles = Vec::new();
    let mut offset = 0;
    let mut skipped = 0usize;

    loop {
        let next = match scanner.scan(region, offset) {
            ScanOutcome::Exhausted => break,
            ScanOutcome::Skipped { next } => {
                skipped += 1;
                next
            }
            ScanOutcome::Found { article, next } => {
                articles.push(article);
                next
            }
        };

        match next {
            Some(n) if n > offset => offset = n,
            _ => break,
        }
    }

    debug!("Scanned page: {} articles, {} skipped", articles.len(), skipped);
    articles
}

/// Turns a results page into [`Article`]s with live bookmark counts.
pub struct PageExtractor<'a> {
    scanner: &'a dyn ArticleBlockScanner,
    counts: &'a dyn BookmarkCountSource,
}

impl<'a> PageExtractor<'a> {
    pub fn new(scanner: &'a dyn ArticleBlockScanner, counts: &'a dyn BookmarkCountSource) -> Self {
        Self { scanner, counts }
    }

    pub async fn extract(&self, html: &str) -> Vec<Article> {
        let scanned = scan_page(self.scanner, html);
        let mut articles = Vec::with_capacity(scanned.len());

        for s in scanned {
            let bookmarks = self.bookmark_count(&s.url).await;
            articles.push(Article {
                url: s.url,
                title: s.title,
                published_date: s.published_date,
                bookmarks,
                tags: s.tags,
            });
        }

        articles
    }

    /// A failed lookup reads the same as an empty body: 0.
    async fn bookmark_count(&self, url: &str) -> i64 {
        match self.counts.fetch_bookmark_count(url).await {
            Ok(body) => normalize_bookmark_count(&body),
            Err(e) => {
                warn!("Bookmark count for {} unavailable: {}", url, e);
                0
            }
        }
    }
}
