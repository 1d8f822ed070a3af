//! DuckDB persistence: permanent article table, staging table, parameter
//! store, run-token registry and run log.
//!
//! Every method that writes outside an explicit transaction runs in DuckDB's
//! autocommit mode, i.e. it is committed by the time it returns. The crawl
//! relies on that for per-row staging durability.

use crate::models::{
    Article, CrawlRun, RunMode, RunToken, SearchTermSet, StagedArticle, StoredArticle, split_tags,
};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use duckdb::{Connection, OptionalExt, Row, params};
use std::path::Path;
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    url                 VARCHAR PRIMARY KEY,
    title               VARCHAR   NOT NULL,
    published_date      VARCHAR   NOT NULL DEFAULT '',
    bookmarks           BIGINT    NOT NULL DEFAULT 0,
    tags                VARCHAR   NOT NULL DEFAULT '',
    scheduled_deletion  DATE      NOT NULL,
    registered_at       TIMESTAMP NOT NULL,
    updated_at          TIMESTAMP NOT NULL
);

-- Same shape minus timestamps; rows live here only until the term is migrated
CREATE TABLE IF NOT EXISTS staged_articles (
    url                 VARCHAR PRIMARY KEY,
    title               VARCHAR   NOT NULL,
    published_date      VARCHAR   NOT NULL DEFAULT '',
    bookmarks           BIGINT    NOT NULL DEFAULT 0,
    tags                VARCHAR   NOT NULL DEFAULT '',
    scheduled_deletion  DATE      NOT NULL
);

CREATE TABLE IF NOT EXISTS parameters (
    name        VARCHAR PRIMARY KEY,
    value       VARCHAR   NOT NULL,
    updated_at  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS run_tokens (
    token       VARCHAR PRIMARY KEY,
    issued_at   TIMESTAMP NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS crawl_run_seq;

CREATE TABLE IF NOT EXISTS crawl_runs (
    id          BIGINT PRIMARY KEY DEFAULT nextval('crawl_run_seq'),
    mode        VARCHAR   NOT NULL,
    started_at  TIMESTAMP NOT NULL,
    finished_at TIMESTAMP,
    status      VARCHAR   NOT NULL DEFAULT 'running',
    staged      BIGINT    DEFAULT 0,
    migrated    BIGINT    DEFAULT 0,
    error_msg   VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_articles_deletion ON articles (scheduled_deletion);
"#;

const ARTICLE_COLUMNS: &str =
    "url, title, published_date, bookmarks, tags, scheduled_deletion, registered_at, updated_at";

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> duckdb::Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL)?;
        self.conn.execute_batch(INDEXES)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Permanent articles ────────────────────────────────────────────────────

    pub fn article_exists(&self, url: &str) -> duckdb::Result<bool> {
        self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM articles WHERE url = ?",
            params![url],
            |r| r.get(0),
        )
    }

    pub fn get_article(&self, url: &str) -> duckdb::Result<Option<StoredArticle>> {
        self.conn
            .query_row(
                &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?"),
                params![url],
                stored_from_row,
            )
            .optional()
    }

    /// Articles whose tag column contains `word`, most bookmarked first.
    pub fn search_by_tag(&self, word: &str) -> duckdb::Result<Vec<StoredArticle>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles
             WHERE tags LIKE '%' || ? || '%'
             ORDER BY bookmarks DESC, registered_at DESC"
        ))?;
        let rows = stmt.query_map(params![word], stored_from_row)?;
        rows.collect()
    }

    pub fn all_articles(&self) -> duckdb::Result<Vec<StoredArticle>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY registered_at, url"
        ))?;
        let rows = stmt.query_map([], stored_from_row)?;
        rows.collect()
    }

    pub fn all_urls(&self) -> duckdb::Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT url FROM articles ORDER BY url")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        rows.collect()
    }

    /// The only mutation a committed article accepts.
    pub fn update_bookmarks(
        &self,
        url: &str,
        bookmarks: i64,
        now: NaiveDateTime,
    ) -> duckdb::Result<usize> {
        self.conn.execute(
            "UPDATE articles SET bookmarks = ?, updated_at = ? WHERE url = ?",
            params![bookmarks, now, url],
        )
    }

    pub fn purge_expired(&self, today: NaiveDate) -> duckdb::Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM articles WHERE scheduled_deletion < ?",
            params![today],
        )?;
        debug!("Purged {} articles scheduled before {}", n, today);
        Ok(n)
    }

    pub fn article_count(&self) -> duckdb::Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM articles")?;
        s.query_row([], |r| r.get(0))
    }

    // ── Staging ───────────────────────────────────────────────────────────────

    pub fn count_staged(&self) -> duckdb::Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM staged_articles")?;
        s.query_row([], |r| r.get(0))
    }

    pub fn is_staged(&self, url: &str) -> duckdb::Result<bool> {
        self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM staged_articles WHERE url = ?",
            params![url],
            |r| r.get(0),
        )
    }

    /// Insert one candidate. Autocommitted on return.
    pub fn stage_article(&self, staged: &StagedArticle) -> duckdb::Result<()> {
        let a = &staged.article;
        self.conn.execute(
            r#"INSERT INTO staged_articles
                   (url, title, published_date, bookmarks, tags, scheduled_deletion)
               VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                a.url,
                a.title,
                a.published_date,
                a.bookmarks,
                a.joined_tags(),
                staged.scheduled_deletion,
            ],
        )?;
        Ok(())
    }

    pub fn migrate_staged_to_main(&self, now: NaiveDateTime) -> duckdb::Result<usize> {
        copy_staged(&self.conn, now)
    }

    pub fn clear_staged(&self) -> duckdb::Result<usize> {
        clear_staged_in(&self.conn)
    }

    /// Copy every staged row into `articles` and empty staging, atomically.
    /// Dropping the transaction on error rolls both statements back.
    pub fn drain_staged(&self, now: NaiveDateTime) -> duckdb::Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let copied = copy_staged(&tx, now)?;
        let cleared = clear_staged_in(&tx)?;
        tx.commit()?;
        debug!("Drained staging: {} copied, {} cleared", copied, cleared);
        Ok(copied)
    }

    // ── Parameters ────────────────────────────────────────────────────────────

    pub fn get_parameter(&self, name: &str) -> duckdb::Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM parameters WHERE name = ?",
                params![name],
                |r| r.get(0),
            )
            .optional()
    }

    pub fn set_parameter(&self, name: &str, value: &str) -> duckdb::Result<()> {
        self.conn.execute(
            r#"INSERT INTO parameters (name, value, updated_at) VALUES (?, ?, ?)
               ON CONFLICT (name) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at"#,
            params![name, value, Utc::now().naive_utc()],
        )?;
        Ok(())
    }

    /// Missing parameter reads as an empty term set.
    pub fn load_search_terms(&self, param: &str) -> duckdb::Result<SearchTermSet> {
        Ok(self
            .get_parameter(param)?
            .map(|raw| SearchTermSet::parse(&raw))
            .unwrap_or_default())
    }

    // ── Run tokens ────────────────────────────────────────────────────────────

    pub fn register_token(&self, token: &RunToken) -> duckdb::Result<()> {
        self.conn.execute(
            "INSERT INTO run_tokens (token, issued_at) VALUES (?, ?)",
            params![token.as_str(), Utc::now().naive_utc()],
        )?;
        Ok(())
    }

    pub fn token_is_registered(&self, token: &RunToken) -> duckdb::Result<bool> {
        self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM run_tokens WHERE token = ?",
            params![token.as_str()],
            |r| r.get(0),
        )
    }

    pub fn clear_token(&self, token: &RunToken) -> duckdb::Result<usize> {
        self.conn.execute(
            "DELETE FROM run_tokens WHERE token = ?",
            params![token.as_str()],
        )
    }

    pub fn token_count(&self) -> duckdb::Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM run_tokens")?;
        s.query_row([], |r| r.get(0))
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> duckdb::Result<()> {
        self.conn.execute_batch(sql)
    }

    // ── Run log ───────────────────────────────────────────────────────────────

    pub fn begin_crawl_run(&self, mode: RunMode) -> duckdb::Result<i64> {
        self.conn.query_row(
            "INSERT INTO crawl_runs (mode, started_at, status) VALUES (?, ?, 'running') RETURNING id",
            params![mode.as_str(), Utc::now().naive_utc()],
            |r| r.get(0),
        )
    }

    pub fn finish_crawl_run(
        &self, run_id: i64, staged: usize, migrated: usize, error: Option<&str>,
    ) -> duckdb::Result<()> {
        self.conn.execute(
            r#"UPDATE crawl_runs SET
               finished_at = ?, status = ?,
               staged = ?, migrated = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                staged as i64, migrated as i64, error, run_id,
            ],
        )?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: usize) -> duckdb::Result<Vec<CrawlRun>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, mode, started_at, finished_at, status, staged, migrated, error_msg
             FROM crawl_runs ORDER BY id DESC LIMIT {limit}"
        ))?;
        let rows = stmt.query_map([], |r| {
            Ok(CrawlRun {
                id: r.get(0)?,
                mode: r.get(1)?,
                started_at: r.get(2)?,
                finished_at: r.get(3)?,
                status: r.get(4)?,
                staged: r.get::<_, Option<i64>>(5)?.unwrap_or(0),
                migrated: r.get::<_, Option<i64>>(6)?.unwrap_or(0),
                error_msg: r.get(7)?,
            })
        })?;
        rows.collect()
    }
}

fn copy_staged(conn: &Connection, now: NaiveDateTime) -> duckdb::Result<usize> {
    conn.execute(
        r#"INSERT OR IGNORE INTO articles
               (url, title, published_date, bookmarks, tags, scheduled_deletion,
                registered_at, updated_at)
           SELECT url, title, published_date, bookmarks, tags, scheduled_deletion,
                  CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP)
           FROM staged_articles"#,
        params![now, now],
    )
}

fn clear_staged_in(conn: &Connection) -> duckdb::Result<usize> {
    conn.execute("DELETE FROM staged_articles", [])
}

fn article_from_row(r: &Row<'_>) -> duckdb::Result<Article> {
    let tags: String = r.get(4)?;
    Ok(Article {
        url: r.get(0)?,
        title: r.get(1)?,
        published_date: r.get(2)?,
        bookmarks: r.get(3)?,
        tags: split_tags(&tags),
    })
}

fn stored_from_row(r: &Row<'_>) -> duckdb::Result<StoredArticle> {
    Ok(StoredArticle {
        article: article_from_row(r)?,
        scheduled_deletion: r.get(5)?,
        registered_at: r.get(6)?,
        updated_at: r.get(7)?,
    })
}
