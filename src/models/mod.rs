use chrono::{NaiveDate, NaiveDateTime};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::error::TokenError;

/// Delimiter used when a tag list is flattened into one column.
pub const TAG_DELIMITER: &str = ",";

// ── Article ───────────────────────────────────────────────────────────────────

/// One article as extracted from a search results page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub published_date: String, // site-native, e.g. "2018/04/21"
    pub bookmarks: i64,
    pub tags: Vec<String>,
}

impl Article {
    pub fn joined_tags(&self) -> String {
        self.tags.join(TAG_DELIMITER)
    }
}

/// Candidate row waiting in the staging table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagedArticle {
    pub article: Article,
    pub scheduled_deletion: NaiveDate,
}

/// Row of the permanent article table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredArticle {
    pub article: Article,
    pub scheduled_deletion: NaiveDate,
    pub registered_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

pub fn split_tags(joined: &str) -> Vec<String> {
    joined
        .split(TAG_DELIMITER)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Search terms ──────────────────────────────────────────────────────────────

/// Ordered search terms for one run, parsed from a comma-separated parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchTermSet {
    terms: Vec<String>,
}

impl SearchTermSet {
    pub fn parse(raw: &str) -> Self {
        let terms = raw
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Self { terms }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn to_param_value(&self) -> String {
        self.terms.join(",")
    }
}

// ── Run token ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunToken(String);

impl RunToken {
    const LEN: usize = 64;

    /// Accepts whatever the caller was handed; blank counts as missing.
    pub fn parse(raw: Option<&str>) -> Result<Self, TokenError> {
        match raw.map(str::trim) {
            Some(t) if !t.is_empty() => Ok(Self(t.to_string())),
            _ => Err(TokenError::Missing),
        }
    }

    pub fn generate() -> Self {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(Self::LEN)
            .map(char::from)
            .collect();
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines; the full token never hits the logs.
    pub fn fingerprint(&self) -> &str {
        let end = self.0.char_indices().nth(8).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

// ── Run log ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Crawl,
    RefreshBookmarks,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Crawl => "crawl",
            RunMode::RefreshBookmarks => "refresh-bookmarks",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrawlRun {
    pub id: i64,
    pub mode: String,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub status: String,
    pub staged: i64,
    pub migrated: i64,
    pub error_msg: Option<String>,
}
