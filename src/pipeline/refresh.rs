//! Bookmark-count refresh: re-reads the live count of every stored article.
//! Same token gate and connectivity rule as the crawl; one commit per row.

use crate::error::CrawlError;
use crate::models::{RunMode, RunToken};
use crate::scraper::cleaner::normalize_bookmark_count;
use crate::scraper::{BookmarkCountSource, SearchSource};
use crate::storage::Repository;
use chrono::Utc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshStats {
    pub articles: usize,
    pub updated: usize,
    pub failed: usize,
}

pub struct BookmarkRefresher<'a> {
    repo: &'a Repository,
    probe: &'a dyn SearchSource,
    counts: &'a dyn BookmarkCountSource,
}

impl<'a> BookmarkRefresher<'a> {
    pub fn new(
        repo: &'a Repository,
        probe: &'a dyn SearchSource,
        counts: &'a dyn BookmarkCountSource,
    ) -> Self {
        Self { repo, probe, counts }
    }

    pub async fn run(&self, token: &RunToken) -> Result<RefreshStats, CrawlError> {
        if !self.repo.token_is_registered(token)? {
            warn!("Run token {}… is not registered", token.fingerprint());
            return Err(CrawlError::InvalidToken);
        }

        let run_id = self.repo.begin_crawl_run(RunMode::RefreshBookmarks).unwrap_or_else(|e| {
            warn!("Could not open run log entry: {}", e);
            0
        });
        let mut stats = RefreshStats::default();
        let outcome = self.refresh(&mut stats).await;

        if let Err(e) = &outcome {
            error!("Bookmark refresh aborted: {}", e);
        }
        if let Err(e) = self.repo.clear_token(token) {
            error!("Could not release run token: {}", e);
        }
        self.repo
            .finish_crawl_run(
                run_id,
                0,
                stats.updated,
                outcome.as_ref().err().map(|e| e.to_string()).as_deref(),
            )
            .unwrap_or_else(|e| warn!("Could not close run log entry {}: {}", run_id, e));

        outcome.map(|()| stats)
    }

    async fn refresh(&self, stats: &mut RefreshStats) -> Result<(), CrawlError> {
        self.probe
            .check_connectivity()
            .await
            .map_err(CrawlError::Connectivity)?;

        let urls = self.repo.all_urls()?;
        stats.articles = urls.len();
        info!("Refreshing bookmark counts of {} articles", urls.len());

        for url in &urls {
            let bookmarks = match self.counts.fetch_bookmark_count(url).await {
                Ok(body) => normalize_bookmark_count(&body),
                Err(e) => {
                    // Keep the stored count rather than overwrite it with a guess.
                    warn!("{}: {}", url, e);
                    stats.failed += 1;
                    continue;
                }
            };
            self.repo.update_bookmarks(url, bookmarks, Utc::now().naive_utc())?;
            debug!("{}: {} bookmarks", url, bookmarks);
            stats.updated += 1;
        }

        info!(
            "Bookmark refresh finished: {} updated, {} failed",
            stats.updated, stats.failed
        );
        Ok(())
    }
}
