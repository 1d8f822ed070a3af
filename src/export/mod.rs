//! CSV export of stored articles.

use crate::models::StoredArticle;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Flat CSV row; tags keep their stored comma-joined form.
#[derive(Debug, Serialize)]
struct ArticleRow<'a> {
    url: &'a str,
    title: &'a str,
    published_date: &'a str,
    bookmarks: i64,
    tags: String,
    scheduled_deletion: String,
    registered_at: String,
    updated_at: String,
}

impl<'a> From<&'a StoredArticle> for ArticleRow<'a> {
    fn from(s: &'a StoredArticle) -> Self {
        Self {
            url: &s.article.url,
            title: &s.article.title,
            published_date: &s.article.published_date,
            bookmarks: s.article.bookmarks,
            tags: s.article.joined_tags(),
            scheduled_deletion: s.scheduled_deletion.format("%Y-%m-%d").to_string(),
            registered_at: s.registered_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            updated_at: s.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

pub fn write_csv<W: Write>(out: W, articles: &[StoredArticle]) -> Result<usize> {
    let mut writer = csv::Writer::from_writer(out);
    for a in articles {
        writer
            .serialize(ArticleRow::from(a))
            .with_context(|| format!("serialize {}", a.article.url))?;
    }
    writer.flush()?;
    Ok(articles.len())
}

pub fn export_to_file(path: &Path, articles: &[StoredArticle]) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Could not create {:?}", path))?;
    let n = write_csv(file, articles)?;
    info!("Exported {} articles to {:?}", n, path);
    Ok(n)
}
