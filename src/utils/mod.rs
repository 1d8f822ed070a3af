use chrono::{Duration as Days, NaiveDate};
use std::time::Instant;
use tracing::info;

/// Logs how long a command took when it goes out of scope.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(label: &'static str) -> Self {
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("⏱  Finished: {} (took {:.2?})", self.label, self.start.elapsed());
    }
}

/// `today + days`, saturating at `today` if the calendar overflows.
pub fn days_after(today: NaiveDate, days: i64) -> NaiveDate {
    today.checked_add_signed(Days::days(days)).unwrap_or(today)
}

/// Format a count with thousands separators.
pub fn fmt_number(n: i64) -> String {
    let s = n.abs().to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    if n < 0 {
        result.push('-');
    }
    result.chars().rev().collect()
}

/// Single-line preview of a title for terminal listings.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_number() {
        assert_eq!(fmt_number(1_234_567), "1,234,567");
        assert_eq!(fmt_number(0), "0");
        assert_eq!(fmt_number(-42_000), "-42,000");
    }

    #[test]
    fn test_days_after() {
        let d = NaiveDate::from_ymd_opt(2018, 4, 21).unwrap();
        assert_eq!(days_after(d, 21), NaiveDate::from_ymd_opt(2018, 5, 12).unwrap());
        assert_eq!(days_after(NaiveDate::MAX, 1), NaiveDate::MAX);
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("技術記事のまとめ", 4), "技術記…");
    }
}
