use scraper::Html;
use tracing::warn;

/// Decode HTML entities (`&amp;`, `&#39;`, …) in a text run and trim it.
/// Any stray markup inside the run is reduced to its text.
pub fn unescape_html(s: &str) -> String {
    let s = s.trim();
    if !s.contains('&') && !s.contains('<') {
        return s.to_string();
    }
    Html::parse_fragment(s)
        .root_element()
        .text()
        .collect::<String>()
        .trim()
        .to_string()
}

/// Bookmark-count API body → count.
/// "" → 0 | " 12\n" → 12 | "1,204" → 1204
pub fn normalize_bookmark_count(body: &str) -> i64 {
    let s = body.trim();
    if s.is_empty() {
        return 0;
    }
    let digits: String = s.chars().filter(|c| *c != ',').collect();
    match digits.parse::<i64>() {
        Ok(n) if n >= 0 => n,
        _ => {
            warn!("Unexpected bookmark count body {:?}, storing 0", s);
            0
        }
    }
}
