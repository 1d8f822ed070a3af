pub mod cleaner;
pub mod extractor;
pub mod http_client;
pub mod parsers;

use crate::config::CrawlerConfig;
use crate::error::FetchError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use self::http_client::HttpClient;

// ── Source traits ─────────────────────────────────────────────────────────────

/// Where result pages come from.
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Fails only when the network itself is unreachable.
    async fn check_connectivity(&self) -> Result<(), FetchError>;

    /// Raw HTML of one tag-search results page (1-based).
    async fn fetch_results_page(&self, term: &str, page: u32) -> Result<String, FetchError>;
}

/// Live bookmark counts, one URL at a time.
#[async_trait]
pub trait BookmarkCountSource: Send + Sync {
    /// Raw response body; may legitimately be empty.
    async fn fetch_bookmark_count(&self, url: &str) -> Result<String, FetchError>;
}

// ── Hatena client ─────────────────────────────────────────────────────────────

pub struct HatenaClient {
    client: HttpClient,
    search_url: String,
    bookmark_count_url: String,
    probe_url: String,
    safe: String,
    sort: String,
    min_users: String,
}

impl HatenaClient {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config).context("Failed to build HTTP client")?,
            search_url: config.search_url.clone(),
            bookmark_count_url: config.bookmark_count_url.clone(),
            probe_url: config.connectivity_probe_url.clone(),
            safe: config.safe.clone(),
            sort: config.sort.clone(),
            min_users: config.min_users.to_string(),
        })
    }

    /// e.g. `/search/tag?q=rust&page=2&safe=on&sort=recent&users=1`
    fn search_page_url(&self, term: &str, page: u32) -> Result<Url, FetchError> {
        let page = page.to_string();
        HttpClient::build_url(
            &self.search_url,
            &[
                ("q", term),
                ("page", &page),
                ("safe", &self.safe),
                ("sort", &self.sort),
                ("users", &self.min_users),
            ],
        )
    }
}

#[async_trait]
impl SearchSource for HatenaClient {
    async fn check_connectivity(&self) -> Result<(), FetchError> {
        let url = HttpClient::build_url(&self.probe_url, &[])?;
        self.client.probe(&url).await
    }

    async fn fetch_results_page(&self, term: &str, page: u32) -> Result<String, FetchError> {
        let url = self.search_page_url(term, page)?;
        let html = self.client.get_text(&url).await?;
        debug!("{} page {}: {} bytes", term, page, html.len());
        Ok(html)
    }
}

#[async_trait]
impl BookmarkCountSource for HatenaClient {
    async fn fetch_bookmark_count(&self, url: &str) -> Result<String, FetchError> {
        let endpoint = HttpClient::build_url(&self.bookmark_count_url, &[("url", url)])?;
        self.client.get_text(&endpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_page_url_carries_site_parameters() {
        let client = HatenaClient::new(&CrawlerConfig::default()).unwrap();
        let url = client.search_page_url("rust", 3).unwrap();
        assert_eq!(
            url.as_str(),
            "https://b.hatena.ne.jp/search/tag?q=rust&page=3&safe=on&sort=recent&users=1"
        );
    }
}
