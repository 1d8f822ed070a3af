use crate::config::CrawlerConfig;
use crate::error::FetchError;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};
use url::Url;

pub struct HttpClient {
    inner: reqwest::Client,
    request_delay_ms: u64,
    jitter_ms: u64,
    max_retries: u32,
    backoff_ms: u64,
}

impl HttpClient {
    pub fn new(config: &CrawlerConfig) -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()?;

        Ok(Self {
            inner,
            request_delay_ms: config.request_delay_ms,
            jitter_ms: config.jitter_ms,
            max_retries: config.max_retries,
            backoff_ms: config.backoff_ms,
        })
    }

    /// Build `base?k=v&…` with proper percent-encoding.
    pub fn build_url(base: &str, params: &[(&str, &str)]) -> Result<Url, FetchError> {
        let mut url = Url::parse(base).map_err(|source| FetchError::InvalidUrl {
            url: base.to_string(),
            source,
        })?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    /// GET a URL as text, with politeness delay and retry on transient failures.
    pub async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        self.polite_delay().await;

        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.backoff_ms)
            .map(jitter)
            .take(self.max_retries as usize);

        RetryIf::start(strategy, move || self.get_once(url), |e: &FetchError| {
            let retry = e.is_transient();
            if retry {
                warn!("{}, retrying", e);
            }
            retry
        })
        .await
    }

    /// Reachability check: any HTTP answer counts, only transport failures don't.
    pub async fn probe(&self, url: &Url) -> Result<(), FetchError> {
        self.inner
            .get(url.clone())
            .send()
            .await
            .map(|resp| debug!("Probe {} answered {}", url, resp.status()))
            .map_err(|source| FetchError::Transport { url: url.to_string(), source })
    }

    async fn get_once(&self, url: &Url) -> Result<String, FetchError> {
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Transport { url: url.to_string(), source })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
        }

        // Declared charset, UTF-8 otherwise; bytes that don't decode are dropped.
        let text = resp
            .text()
            .await
            .map_err(|source| FetchError::Transport { url: url.to_string(), source })?;
        Ok(drop_undecodable(text))
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        if self.request_delay_ms == 0 && self.jitter_ms == 0 {
            return;
        }
        let jitter = rand::rng().random_range(0..=self.jitter_ms);
        sleep(Duration::from_millis(self.request_delay_ms + jitter)).await;
    }
}

fn drop_undecodable(text: String) -> String {
    if text.contains(char::REPLACEMENT_CHARACTER) {
        text.replace(char::REPLACEMENT_CHARACTER, "")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_encodes_query() {
        let url = HttpClient::build_url(
            "https://b.hatena.ne.jp/search/tag",
            &[("q", "c++ & rust"), ("page", "2")],
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://b.hatena.ne.jp/search/tag?q=c%2B%2B+%26+rust&page=2");
    }

    #[test]
    fn test_build_url_rejects_garbage_base() {
        let err = HttpClient::build_url("::nope::", &[]).unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    #[test]
    fn test_build_url_without_params_keeps_base() {
        let url = HttpClient::build_url("http://info.cern.ch/", &[]).unwrap();
        assert_eq!(url.as_str(), "http://info.cern.ch/");
    }

    #[tokio::test]
    async fn test_refused_connection_is_retried_then_reported() {
        let config = CrawlerConfig {
            request_delay_ms: 0,
            jitter_ms: 0,
            max_retries: 1,
            backoff_ms: 1,
            timeout_secs: 2,
            ..CrawlerConfig::default()
        };
        let client = HttpClient::new(&config).unwrap();
        let url = HttpClient::build_url("http://127.0.0.1:9/", &[]).unwrap();

        let err = client.get_text(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_replacement_chars_are_dropped() {
        assert_eq!(drop_undecodable("ab\u{FFFD}c".to_string()), "abc");
        assert_eq!(drop_undecodable("plain".to_string()), "plain");
    }
}
