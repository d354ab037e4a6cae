//! Utility functions for timestamps, cache partitions, text normalization and
//! file system checks.
//!
//! This module provides helper functions used throughout the application:
//! - Millisecond ISO-8601 timestamps for cache metadata
//! - Date partitions used in cache keys
//! - Whitespace normalization and month names for extracted text
//! - String truncation and slugification for logging and output file names
//! - File system validation for output directories

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Utc};
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

/// Format a timestamp as ISO-8601 with millisecond precision, e.g.
/// `2013-08-26T04:15:00.000Z`.
pub fn iso_millis(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp written by [`iso_millis`] (any RFC 3339 form is accepted).
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Cache partition for daily indexes: `YYYY/MM/DD-`.
pub fn index_partition(date: NaiveDate) -> String {
    format!("{:04}/{:02}/{:02}-", date.year(), date.month(), date.day())
}

/// Cache partition for articles: `YYYY/MM/DD/`.
pub fn article_partition(date: NaiveDate) -> String {
    format!("{:04}/{:02}/{:02}/", date.year(), date.month(), date.day())
}

/// Collapse runs of whitespace into single spaces and trim both ends.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(collapse_whitespace("  By \n JOHN   SMITH "), "By JOHN SMITH");
/// ```
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Month number for an English month name or abbreviation (`Aug`, `Sept.`, `August`).
pub fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_ascii_lowercase().get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` bytes (backing off to a character
/// boundary) with an ellipsis and byte count indicator appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Convert a title to a file-name friendly slug.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify_title("Hello World"), "hello-world");
/// assert_eq!(slugify_title("Test-Article!"), "test-article");
/// ```
pub fn slugify_title(title: &str) -> String {
    title
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .replace(' ', "-")
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), std::io::Error> {
    fs::create_dir_all(path).await?;
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}
