use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Crawler configuration: endpoints, politeness and the crawl heuristics
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    #[serde(default = "default_search_url")]
    pub search_url: String,

    #[serde(default = "default_bookmark_count_url")]
    pub bookmark_count_url: String,

    #[serde(default = "default_connectivity_probe_url")]
    pub connectivity_probe_url: String,

    #[serde(default = "default_safe")]
    pub safe: String,

    #[serde(default = "default_sort")]
    pub sort: String,

    #[serde(default = "default_min_users")]
    pub min_users: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Result pages requested per search term.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Consecutive already-known articles after which the rest of a page is dropped.
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: u32,

    /// Days between registration and the scheduled deletion date.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    #[serde(default = "default_search_terms_param")]
    pub search_terms_param: String,

    #[serde(default = "default_shortener_patterns")]
    pub shortener_patterns: Vec<String>,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_search_url() -> String {
    "https://b.hatena.ne.jp/search/tag".to_string()
}
fn default_bookmark_count_url() -> String {
    "https://bookmark.hatenaapis.com/count/entry".to_string()
}
fn default_connectivity_probe_url() -> String {
    "http://info.cern.ch/".to_string()
}
fn default_safe() -> String {
    "on".to_string()
}
fn default_sort() -> String {
    "recent".to_string()
}
fn default_min_users() -> u32 {
    1
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:47.0) Gecko/20100101 Firefox/47.0".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    1000
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_max_pages() -> u32 {
    5
}
fn default_duplicate_threshold() -> u32 {
    10
}
fn default_retention_days() -> i64 {
    21
}
fn default_search_terms_param() -> String {
    "SEARCH_WORDS_FOR_TECH_ARTICLES".to_string()
}
fn default_shortener_patterns() -> Vec<String> {
    vec!["ift.tt".to_string()]
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/metis.duckdb")
}
fn default_true() -> bool {
    true
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            bookmark_count_url: default_bookmark_count_url(),
            connectivity_probe_url: default_connectivity_probe_url(),
            safe: default_safe(),
            sort: default_sort(),
            min_users: default_min_users(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            max_pages: default_max_pages(),
            duplicate_threshold: default_duplicate_threshold(),
            retention_days: default_retention_days(),
            search_terms_param: default_search_terms_param(),
            shortener_patterns: default_shortener_patterns(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("METIS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("crawler.shortener_patterns")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration sources")?;

        cfg.try_deserialize().context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_site_conventions() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.crawler.max_pages, 5);
        assert_eq!(cfg.crawler.duplicate_threshold, 10);
        assert_eq!(cfg.crawler.retention_days, 21);
        assert_eq!(cfg.crawler.sort, "recent");
        assert_eq!(cfg.crawler.shortener_patterns, vec!["ift.tt".to_string()]);
        assert!(cfg.storage.run_migrations);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[crawler]\nmax_pages = 2\n[storage]\ndb_path = \"/tmp/x.duckdb\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.crawler.max_pages, 2);
        assert_eq!(cfg.crawler.timeout_secs, 30);
        assert_eq!(cfg.crawler.request_delay_ms, 1000);
        assert_eq!(cfg.crawler.jitter_ms, 500);
        assert_eq!(cfg.storage.db_path, PathBuf::from("/tmp/x.duckdb"));
        assert!(cfg.storage.run_migrations);
    }
}
