//! Processor version identifiers.
//!
//! A processor version names the revision of the parsing logic that produced
//! a processed document. Versions are `YYYYMMDD` dates, optionally followed by
//! a two digit sequence (`YYYYMMDDNN`) and optionally a `-dev` suffix marking
//! an unreleased parser. The patch number counts bug fixes shipped under the
//! same version.
//!
//! Ordering pads the digit part to ten digits (`20130909` sorts as
//! `2013090900`), so plain dates and date+sequence versions interleave
//! correctly. Cache gating never uses the ordering: it requires the exact
//! version string.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

const DEV_SUFFIX: &str = "-dev";
const SORT_WIDTH: usize = 10;

/// The revision of the parsing logic currently running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorVersion {
    pub version: String,
    pub patch: u32,
}

impl ProcessorVersion {
    pub fn new(version: impl Into<String>, patch: u32) -> Self {
        Self {
            version: version.into(),
            patch,
        }
    }

    /// `true` for development builds, whose output must never be reused.
    pub fn is_dev(&self) -> bool {
        is_dev_version(&self.version)
    }

    /// Compare the version part only, ignoring the patch.
    pub fn cmp_version(&self, other: &str) -> Ordering {
        sort_key(&self.version).cmp(&sort_key(other))
    }

    /// Whether a processed entry tagged with `cached` may be reused.
    pub fn accepts_cached(&self, cached: Option<&str>) -> bool {
        match cached {
            Some(v) => v == self.version && !is_dev_version(v),
            None => false,
        }
    }
}

impl fmt::Display for ProcessorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.version, self.patch)
    }
}

pub fn is_dev_version(version: &str) -> bool {
    version.ends_with(DEV_SUFFIX)
}

/// Numeric ordering key of a version string.
///
/// Non-digit characters terminate the digit part; an empty digit part sorts
/// before everything.
pub fn sort_key(version: &str) -> u64 {
    let digits: String = version
        .trim_end_matches(DEV_SUFFIX)
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .take(SORT_WIDTH)
        .collect();
    if digits.is_empty() {
        return 0;
    }
    let padded = format!("{digits:0<width$}", width = SORT_WIDTH);
    padded.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_pads_plain_dates() {
        assert_eq!(sort_key("20130909"), 2013090900);
        assert_eq!(sort_key("2013091504"), 2013091504);
        assert_eq!(sort_key("20130909-dev"), 2013090900);
        assert_eq!(sort_key(""), 0);
    }

    #[test]
    fn test_date_and_sequence_versions_interleave() {
        let current = ProcessorVersion::new("2013091504", 0);
        assert_eq!(current.cmp_version("20130909"), Ordering::Greater);
        assert_eq!(current.cmp_version("20130916"), Ordering::Less);
        assert_eq!(current.cmp_version("2013091504"), Ordering::Equal);
    }

    #[test]
    fn test_gating_requires_exact_match() {
        let current = ProcessorVersion::new("2013091504", 3);
        assert!(current.accepts_cached(Some("2013091504")));
        assert!(!current.accepts_cached(Some("20130909")));
        assert!(!current.accepts_cached(None));
    }

    #[test]
    fn test_dev_versions_never_reused() {
        let dev = ProcessorVersion::new("20130909-dev", 0);
        assert!(dev.is_dev());
        assert!(!dev.accepts_cached(Some("20130909-dev")));
    }

    #[test]
    fn test_display() {
        assert_eq!(ProcessorVersion::new("20130825", 2).to_string(), "20130825.2");
    }
}
