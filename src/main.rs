mod config;
mod error;
mod export;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::models::{RunToken, SearchTermSet};
use crate::pipeline::CrawlOrchestrator;
use crate::pipeline::refresh::BookmarkRefresher;
use crate::scraper::HatenaClient;
use crate::scraper::extractor::PageExtractor;
use crate::scraper::parsers::HatenaBlockScanner;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "metis", about = "Hatena bookmark tag crawler", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl every configured search term and store new articles
    Crawl {
        /// Single-use run token (see `issue-token`)
        #[arg(long, env = "METIS_RUN_TOKEN")]
        token: Option<String>,
    },

    /// Re-read the bookmark count of every stored article
    RefreshBookmarks {
        #[arg(long, env = "METIS_RUN_TOKEN")]
        token: Option<String>,
    },

    /// Generate and register a run token
    IssueToken,

    /// Show the search terms, or replace them with a comma-separated list
    Terms {
        #[arg(long)]
        set: Option<String>,
    },

    /// List stored articles whose tags contain a word
    Search { word: String },

    /// Write stored articles to CSV
    Export {
        #[arg(short, long, default_value = "data/articles.csv")]
        out: PathBuf,

        /// Only articles whose tags contain this word
        #[arg(long)]
        tag: Option<String>,
    },

    /// Delete articles past their scheduled deletion date
    Purge,

    /// Show database statistics
    Stats,

    /// Apply schema migrations without crawling
    Migrate,
}

fn open_repo(config: &AppConfig) -> Result<Repository> {
    let repo = Repository::open(&config.storage.db_path)?;
    if config.storage.run_migrations {
        repo.run_migrations().context("Schema migration failed")?;
    }
    Ok(repo)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "metis=info,warn",
        1 => "metis=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Crawl { token } => {
            let token = RunToken::parse(token.as_deref())?;
            let _t = utils::Timer::start("Crawl");
            let repo = open_repo(&config)?;

            let client = HatenaClient::new(&config.crawler)?;
            let scanner = HatenaBlockScanner::new(config.crawler.shortener_patterns.clone());
            let extractor = PageExtractor::new(&scanner, &client);
            let mut orchestrator =
                CrawlOrchestrator::new(&repo, &client, extractor, config.crawler.clone());

            let stats = orchestrator.run(&token).await?;
            info!(
                "Done: {} terms, {} articles added, {} recovered",
                stats.terms_processed, stats.migrated, stats.recovered
            );
        }

        Command::RefreshBookmarks { token } => {
            let token = RunToken::parse(token.as_deref())?;
            let _t = utils::Timer::start("Bookmark refresh");
            let repo = open_repo(&config)?;

            let client = HatenaClient::new(&config.crawler)?;
            let stats = BookmarkRefresher::new(&repo, &client, &client).run(&token).await?;
            info!(
                "Done: {} articles, {} updated, {} failed",
                stats.articles, stats.updated, stats.failed
            );
        }

        Command::IssueToken => {
            let repo = open_repo(&config)?;
            let token = RunToken::generate();
            repo.register_token(&token)?;
            info!("Registered run token {}…", token.fingerprint());
            println!("{}", token.as_str());
        }

        Command::Terms { set } => {
            let repo = open_repo(&config)?;
            let param = &config.crawler.search_terms_param;
            if let Some(raw) = set {
                let terms = SearchTermSet::parse(&raw);
                repo.set_parameter(param, &terms.to_param_value())?;
                info!("Stored {} search terms in {}", terms.len(), param);
            }
            let terms = repo.load_search_terms(param)?;
            if terms.is_empty() {
                println!("No search terms, set some with `metis terms --set rust,python`.");
            } else {
                println!("{} search terms:", terms.len());
                for t in terms.iter() {
                    println!("  {}", t);
                }
            }
        }

        Command::Search { word } => {
            let repo = open_repo(&config)?;
            let hits = repo.search_by_tag(&word)?;
            if hits.is_empty() {
                println!("No articles tagged {:?}.", word);
            }
            for a in &hits {
                println!(
                    "{:>6}  {}  {}",
                    utils::fmt_number(a.article.bookmarks),
                    a.article.published_date,
                    utils::truncate(&a.article.title, 60)
                );
                println!("        {}", a.article.url);
            }
        }

        Command::Export { out, tag } => {
            let repo = open_repo(&config)?;
            let articles = match tag.as_deref() {
                Some(word) => repo.search_by_tag(word)?,
                None => repo.all_articles()?,
            };
            let n = export::export_to_file(&out, &articles)?;
            println!("Wrote {} articles to {}", n, out.display());
        }

        Command::Purge => {
            let repo = open_repo(&config)?;
            let removed = repo.purge_expired(Local::now().date_naive())?;
            info!("Purged {} expired articles", removed);
        }

        Command::Stats => {
            let repo = open_repo(&config)?;
            println!("─────────────────────────────────");
            println!("  metis · Database Stats");
            println!("─────────────────────────────────");
            println!("  Articles : {}", utils::fmt_number(repo.article_count()?));
            println!("  Staged   : {}", utils::fmt_number(repo.count_staged()?));
            println!("  Tokens   : {}", utils::fmt_number(repo.token_count()?));
            println!("─────────────────────────────────");
            for run in repo.recent_runs(5)? {
                println!(
                    "  #{:<4} {:<17} {} {:<7} staged {} migrated {}",
                    run.id,
                    run.mode,
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    run.status,
                    run.staged,
                    run.migrated,
                );
                if let Some(msg) = &run.error_msg {
                    println!("        {}", msg);
                }
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
