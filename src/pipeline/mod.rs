//! Crawl orchestrator: ties search source → extractor → staging → articles.
//!
//! ## Run sequence
//!
//! 1. Check the run token against the registry (unknown token: stop, no I/O).
//! 2. Probe connectivity; an unreachable network is fatal.
//! 3. `RecoveringStaged`: rows left in staging by an interrupted run are
//!    migrated before anything new is fetched.
//! 4. For each search term, pages `1..=max_pages`:
//!    fetch → extract → per article: known URL bumps the duplicate counter,
//!    new URL resets it and is staged with its own commit. Once the counter
//!    reaches the threshold the rest of that page is dropped, on the
//!    assumption that results are newest-first.
//! 5. `MigratingTerm`: staging is copied into `articles` and cleared in one
//!    transaction.
//!
//! The token is released whether the run succeeds or fails. Runs are assumed
//! to be single-instance; the token is an advisory guard, not a lock.

pub mod refresh;

use crate::config::CrawlerConfig;
use crate::error::CrawlError;
use crate::models::{Article, RunMode, RunToken, StagedArticle};
use crate::scraper::SearchSource;
use crate::scraper::extractor::PageExtractor;
use crate::storage::Repository;
use crate::utils::days_after;
use chrono::{Local, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    RecoveringStaged,
    CrawlingTerm { term: String, page: u32 },
    MigratingTerm { term: String },
    Aborted,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    pub recovered: usize,
    pub terms_processed: usize,
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub articles_seen: usize,
    pub staged: usize,
    pub duplicates: usize,
    pub pages_cut_short: usize,
    pub migrated: usize,
}

/// What happened to the articles of one page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PageOutcome {
    staged: usize,
    duplicates: usize,
    abandoned: usize,
}

pub struct CrawlOrchestrator<'a> {
    repo: &'a Repository,
    search: &'a dyn SearchSource,
    extractor: PageExtractor<'a>,
    config: CrawlerConfig,
    state: CrawlState,
}

impl<'a> CrawlOrchestrator<'a> {
    pub fn new(
        repo: &'a Repository,
        search: &'a dyn SearchSource,
        extractor: PageExtractor<'a>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            repo,
            search,
            extractor,
            config,
            state: CrawlState::Idle,
        }
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    /// One full crawl gated by `token`.
    pub async fn run(&mut self, token: &RunToken) -> Result<CrawlStats, CrawlError> {
        if !self.repo.token_is_registered(token)? {
            warn!("Run token {}… is not registered", token.fingerprint());
            return Err(CrawlError::InvalidToken);
        }
        info!("Run token {}… accepted", token.fingerprint());

        let run_id = self.repo.begin_crawl_run(RunMode::Crawl).unwrap_or_else(|e| {
            warn!("Could not open run log entry: {}", e);
            0
        });
        let mut stats = CrawlStats::default();
        let outcome = self.crawl(&mut stats).await;

        if let Err(e) = &outcome {
            self.transition(CrawlState::Aborted);
            error!("Crawl aborted: {}", e);
            if matches!(e, CrawlError::Database(_)) {
                info!("Uncommitted work rolled back");
            }
        }

        // Cleanup runs on both paths so a failed run never locks out the next.
        if let Err(e) = self.repo.clear_token(token) {
            error!("Could not release run token: {}", e);
        }
        self.repo
            .finish_crawl_run(
                run_id,
                stats.staged,
                stats.migrated + stats.recovered,
                outcome.as_ref().err().map(|e| e.to_string()).as_deref(),
            )
            .unwrap_or_else(|e| warn!("Could not close run log entry {}: {}", run_id, e));

        outcome.map(|()| stats)
    }

    async fn crawl(&mut self, stats: &mut CrawlStats) -> Result<(), CrawlError> {
        self.search
            .check_connectivity()
            .await
            .map_err(CrawlError::Connectivity)?;

        self.transition(CrawlState::RecoveringStaged);
        stats.recovered = self.recover_staged()?;

        let terms = self.repo.load_search_terms(&self.config.search_terms_param)?;
        if terms.is_empty() {
            warn!(
                "Parameter {} holds no search terms, nothing to crawl",
                self.config.search_terms_param
            );
        }
        info!("Crawling {} search terms", terms.len());

        let scheduled_deletion = self.scheduled_deletion();

        for term in terms.iter() {
            for page in 1..=self.config.max_pages {
                self.transition(CrawlState::CrawlingTerm { term: term.to_string(), page });

                let html = match self.search.fetch_results_page(term, page).await {
                    Ok(html) => {
                        stats.pages_fetched += 1;
                        html
                    }
                    Err(e) => {
                        warn!("{} page {}: {}, treating as empty", term, page, e);
                        stats.pages_failed += 1;
                        continue;
                    }
                };

                let articles = self.extractor.extract(&html).await;
                stats.articles_seen += articles.len();

                let outcome = self.stage_page(articles, scheduled_deletion)?;
                stats.staged += outcome.staged;
                stats.duplicates += outcome.duplicates;
                if outcome.abandoned > 0 {
                    stats.pages_cut_short += 1;
                }
                debug!(
                    "{} page {}: {} staged, {} known, {} dropped",
                    term, page, outcome.staged, outcome.duplicates, outcome.abandoned
                );
            }

            self.transition(CrawlState::MigratingTerm { term: term.to_string() });
            let migrated = self.repo.drain_staged(Utc::now().naive_utc())?;
            stats.migrated += migrated;
            stats.terms_processed += 1;
            info!("Search term {:?}: {} articles added", term, migrated);
        }

        self.transition(CrawlState::Idle);
        info!(
            "Crawl finished: {} terms | {} pages ({} failed) | {} staged | {} known | {} recovered",
            stats.terms_processed,
            stats.pages_fetched + stats.pages_failed,
            stats.pages_failed,
            stats.staged,
            stats.duplicates,
            stats.recovered,
        );
        Ok(())
    }

    /// Migrate whatever an interrupted run left in staging.
    fn recover_staged(&self) -> Result<usize, CrawlError> {
        let pending = self.repo.count_staged()?;
        if pending == 0 {
            return Ok(0);
        }
        warn!("Found {} staged articles from an interrupted run, migrating", pending);
        let migrated = self.repo.drain_staged(Utc::now().naive_utc())?;
        info!("Recovered {} articles", migrated);
        Ok(migrated)
    }

    /// Stage the new articles of one page, in page order.
    fn stage_page(
        &self,
        articles: Vec<Article>,
        scheduled_deletion: NaiveDate,
    ) -> Result<PageOutcome, CrawlError> {
        let threshold = self.config.duplicate_threshold as usize;
        let total = articles.len();
        let mut outcome = PageOutcome::default();
        let mut consecutive = 0usize;

        for (i, article) in articles.into_iter().enumerate() {
            if consecutive >= threshold {
                outcome.abandoned = total - i;
                debug!("{} known articles in a row, dropping rest of page", consecutive);
                break;
            }

            if self.repo.article_exists(&article.url)? || self.repo.is_staged(&article.url)? {
                consecutive += 1;
                outcome.duplicates += 1;
                continue;
            }

            consecutive = 0;
            debug!("Staging {}", article.url);
            self.repo.stage_article(&StagedArticle { article, scheduled_deletion })?;
            outcome.staged += 1;
        }

        Ok(outcome)
    }

    fn scheduled_deletion(&self) -> NaiveDate {
        days_after(Local::now().date_naive(), self.config.retention_days)
    }

    fn transition(&mut self, next: CrawlState) {
        debug!("{:?} → {:?}", self.state, next);
        self.state = next;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSite;
    use super::*;
    use crate::models::Article;
    use crate::scraper::parsers::HatenaBlockScanner;
    use crate::scraper::parsers::fixtures::{block, page};

    const TERMS_PARAM: &str = "SEARCH_WORDS_FOR_TECH_ARTICLES";

    fn repo_with_terms(terms: &str) -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo.set_parameter(TERMS_PARAM, terms).unwrap();
        repo
    }

    fn config(max_pages: u32) -> CrawlerConfig {
        CrawlerConfig { max_pages, ..CrawlerConfig::default() }
    }

    fn token(repo: &Repository) -> RunToken {
        let token = RunToken::generate();
        repo.register_token(&token).unwrap();
        token
    }

    fn url(n: usize) -> String {
        format!("https://example.com/{n}")
    }

    fn results(urls: &[String]) -> String {
        let blocks: Vec<String> = urls
            .iter()
            .map(|u| block(u, &format!("Title {u}"), "2018/04/21", &["rust"]))
            .collect();
        page(&blocks)
    }

    fn preload(repo: &Repository, urls: &[String]) {
        for u in urls {
            repo.stage_article(&staged(u)).unwrap();
        }
        repo.drain_staged(Utc::now().naive_utc()).unwrap();
    }

    fn staged(u: &str) -> StagedArticle {
        StagedArticle {
            article: Article {
                url: u.to_string(),
                title: "old".into(),
                published_date: "2018/01/01".into(),
                bookmarks: 1,
                tags: vec![],
            },
            scheduled_deletion: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
        }
    }

    async fn crawl(repo: &Repository, site: &FakeSite, cfg: CrawlerConfig) -> Result<CrawlStats, CrawlError> {
        let scanner = HatenaBlockScanner::default();
        let extractor = PageExtractor::new(&scanner, site);
        let mut orchestrator = CrawlOrchestrator::new(repo, site, extractor, cfg);
        let token = token(repo);
        let outcome = orchestrator.run(&token).await;
        assert!(!repo.token_is_registered(&token).unwrap(), "token must be released");
        outcome
    }

    #[tokio::test]
    async fn test_new_articles_end_up_in_main_store() {
        let repo = repo_with_terms("rust");
        let mut site = FakeSite::default().with_page("rust", 1, results(&[url(1), url(2)]));
        site.counts.insert(url(1), "5".into());

        let stats = crawl(&repo, &site, config(2)).await.unwrap();

        assert_eq!(stats.staged, 2);
        assert_eq!(stats.migrated, 2);
        assert_eq!(stats.pages_fetched, 1);
        assert_eq!(stats.pages_failed, 1); // page 2 answers 404
        assert_eq!(repo.article_count().unwrap(), 2);
        assert_eq!(repo.count_staged().unwrap(), 0);

        let stored = repo.get_article(&url(1)).unwrap().unwrap();
        assert_eq!(stored.article.title, format!("Title {}", url(1)));
        assert_eq!(stored.article.bookmarks, 5);
        // Empty count body is stored as zero.
        assert_eq!(repo.get_article(&url(2)).unwrap().unwrap().article.bookmarks, 0);
        assert_eq!(
            stored.scheduled_deletion,
            Local::now().date_naive() + chrono::Duration::days(21)
        );
    }

    #[tokio::test]
    async fn test_second_identical_run_adds_nothing() {
        let repo = repo_with_terms("rust,go");
        let site = FakeSite::default()
            .with_page("rust", 1, results(&[url(1), url(2)]))
            .with_page("go", 1, results(&[url(2), url(3)]));

        let first = crawl(&repo, &site, config(1)).await.unwrap();
        assert_eq!(first.migrated, 3);
        let second = crawl(&repo, &site, config(1)).await.unwrap();
        assert_eq!(second.migrated, 0);
        assert_eq!(second.duplicates, 4);
        assert_eq!(repo.article_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_leftover_staging_is_recovered_first() {
        let repo = repo_with_terms("rust");
        // A previous run died after staging three rows.
        for n in 1..=3 {
            repo.stage_article(&staged(&url(n))).unwrap();
        }
        let site = FakeSite::default();

        let stats = crawl(&repo, &site, config(1)).await.unwrap();

        assert_eq!(stats.recovered, 3);
        assert_eq!(repo.article_count().unwrap(), 3);
        assert_eq!(repo.count_staged().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recovered_urls_are_not_staged_again() {
        let repo = repo_with_terms("rust");
        repo.stage_article(&staged(&url(1))).unwrap();
        let site = FakeSite::default().with_page("rust", 1, results(&[url(1), url(2)]));

        let stats = crawl(&repo, &site, config(1)).await.unwrap();

        assert_eq!(stats.recovered, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.staged, 1);
        assert_eq!(repo.article_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ten_known_articles_cut_the_page_short() {
        let repo = repo_with_terms("rust");
        let known: Vec<String> = (1..=10).map(url).collect();
        preload(&repo, &known);

        let mut listed = known.clone();
        listed.push(url(11));
        let site = FakeSite::default().with_page("rust", 1, results(&listed));

        let stats = crawl(&repo, &site, config(1)).await.unwrap();

        assert_eq!(stats.duplicates, 10);
        assert_eq!(stats.pages_cut_short, 1);
        assert_eq!(stats.staged, 0);
        assert!(!repo.article_exists(&url(11)).unwrap());
    }

    #[tokio::test]
    async fn test_new_article_resets_duplicate_run() {
        let repo = repo_with_terms("rust");
        let known: Vec<String> = (1..=18).map(url).collect();
        preload(&repo, &known);

        // 9 known, 1 new, 9 known, 1 new: the counter never reaches 10.
        let mut listed: Vec<String> = (1..=9).map(url).collect();
        listed.push(url(100));
        listed.extend((10..=18).map(url));
        listed.push(url(101));
        let site = FakeSite::default().with_page("rust", 1, results(&listed));

        let stats = crawl(&repo, &site, config(1)).await.unwrap();

        assert_eq!(stats.staged, 2);
        assert_eq!(stats.pages_cut_short, 0);
        assert!(repo.article_exists(&url(100)).unwrap());
        assert!(repo.article_exists(&url(101)).unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_counter_restarts_on_each_page() {
        let repo = repo_with_terms("rust");
        let known: Vec<String> = (1..=10).map(url).collect();
        preload(&repo, &known);

        let site = FakeSite::default()
            .with_page("rust", 1, results(&known))
            .with_page("rust", 2, results(&[url(50)]));

        let stats = crawl(&repo, &site, config(2)).await.unwrap();

        assert_eq!(stats.staged, 1);
        assert!(repo.article_exists(&url(50)).unwrap());
    }

    #[tokio::test]
    async fn test_shortened_links_never_reach_the_store() {
        let repo = repo_with_terms("rust");
        let site = FakeSite::default().with_page(
            "rust",
            1,
            results(&[url(1), "https://ift.tt/abc".to_string(), url(2)]),
        );

        crawl(&repo, &site, config(1)).await.unwrap();

        assert_eq!(repo.all_urls().unwrap(), vec![url(1), url(2)]);
    }

    #[tokio::test]
    async fn test_unknown_token_does_no_network_io() {
        let repo = repo_with_terms("rust");
        let site = FakeSite::default().with_page("rust", 1, results(&[url(1)]));
        let scanner = HatenaBlockScanner::default();
        let mut orchestrator =
            CrawlOrchestrator::new(&repo, &site, PageExtractor::new(&scanner, &site), config(1));

        let err = orchestrator.run(&RunToken::generate()).await.unwrap_err();

        assert!(matches!(err, CrawlError::InvalidToken));
        assert_eq!(site.requests(), 0);
        assert_eq!(repo.article_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_is_fatal_but_releases_token() {
        let repo = repo_with_terms("rust");
        repo.stage_article(&staged(&url(1))).unwrap();
        let site = FakeSite { offline: true, ..FakeSite::default() };

        let err = crawl(&repo, &site, config(1)).await.unwrap_err();

        assert!(matches!(err, CrawlError::Connectivity(_)));
        // Nothing touched: staging is left for the next run to recover.
        assert_eq!(repo.count_staged().unwrap(), 1);
        let runs = repo.recent_runs(1).unwrap();
        assert_eq!(runs[0].status, "error");
    }

    #[tokio::test]
    async fn test_database_failure_aborts_and_releases_token() {
        let repo = repo_with_terms("rust");
        repo.execute_batch("DROP TABLE articles").unwrap();
        let site = FakeSite::default().with_page("rust", 1, results(&[url(1)]));
        let scanner = HatenaBlockScanner::default();
        let mut orchestrator =
            CrawlOrchestrator::new(&repo, &site, PageExtractor::new(&scanner, &site), config(1));
        let token = token(&repo);

        let err = orchestrator.run(&token).await.unwrap_err();

        assert!(matches!(err, CrawlError::Database(_)));
        assert_eq!(orchestrator.state(), &CrawlState::Aborted);
        assert!(!repo.token_is_registered(&token).unwrap());
        let runs = repo.recent_runs(1).unwrap();
        assert_eq!(runs[0].status, "error");
        assert!(runs[0].error_msg.is_some());
    }

    #[tokio::test]
    async fn test_failed_migration_leaves_staging_for_next_run() {
        let repo = repo_with_terms("rust");
        // Lookups by url still work, the copy into articles does not.
        repo.execute_batch("DROP TABLE articles; CREATE TABLE articles (url VARCHAR PRIMARY KEY);")
            .unwrap();
        let site = FakeSite::default().with_page("rust", 1, results(&[url(1), url(2)]));

        let err = crawl(&repo, &site, config(1)).await.unwrap_err();
        assert!(matches!(err, CrawlError::Database(_)));
        assert_eq!(repo.count_staged().unwrap(), 2);

        repo.execute_batch("DROP TABLE articles").unwrap();
        repo.run_migrations().unwrap();
        let stats = crawl(&repo, &FakeSite::default(), config(1)).await.unwrap();

        assert_eq!(stats.recovered, 2);
        assert_eq!(repo.article_count().unwrap(), 2);
        assert_eq!(repo.count_staged().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_run_log_does_not_stop_crawl() {
        let repo = repo_with_terms("rust");
        repo.execute_batch("DROP TABLE crawl_runs").unwrap();
        let site = FakeSite::default().with_page("rust", 1, results(&[url(1)]));

        let stats = crawl(&repo, &site, config(1)).await.unwrap();

        assert_eq!(stats.migrated, 1);
        assert_eq!(repo.article_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_state_ends_idle_or_aborted() {
        let repo = repo_with_terms("rust");
        let site = FakeSite::default();
        let scanner = HatenaBlockScanner::default();

        let mut orchestrator =
            CrawlOrchestrator::new(&repo, &site, PageExtractor::new(&scanner, &site), config(1));
        assert_eq!(orchestrator.state(), &CrawlState::Idle);
        orchestrator.run(&token(&repo)).await.unwrap();
        assert_eq!(orchestrator.state(), &CrawlState::Idle);

        let offline = FakeSite { offline: true, ..FakeSite::default() };
        let mut orchestrator =
            CrawlOrchestrator::new(&repo, &offline, PageExtractor::new(&scanner, &offline), config(1));
        orchestrator.run(&token(&repo)).await.unwrap_err();
        assert_eq!(orchestrator.state(), &CrawlState::Aborted);
    }

    #[tokio::test]
    async fn test_bookmark_lookup_per_extracted_article() {
        let repo = repo_with_terms("rust");
        let site = FakeSite::default().with_page(
            "rust",
            1,
            results(&[url(1), "https://ift.tt/x".to_string(), url(2)]),
        );

        crawl(&repo, &site, config(1)).await.unwrap();

        let looked_up = site.count_requests.lock().unwrap().clone();
        assert_eq!(looked_up, vec![url(1), url(2)]);
    }
}
