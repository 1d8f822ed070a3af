use thiserror::Error;

/// A single outbound request that did not produce a usable body.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid request URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    /// Timeouts, connection failures, 429 and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::InvalidUrl { .. } => false,
            FetchError::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("no run token supplied (pass --token or set METIS_RUN_TOKEN)")]
    Missing,
}

/// Run-level failures. Anything here ends the run.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("run token is not registered")]
    InvalidToken,

    #[error("no network connectivity: {0}")]
    Connectivity(#[source] FetchError),

    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),
}
