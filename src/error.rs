//! Error types shared across the pipeline.
//!
//! Each concern owns one enum and the orchestrator composes them through
//! `#[from]` conversions. A cache miss is never an error: lookups return
//! `Ok(None)`, and a processor-version mismatch is reported the same way.

use thiserror::Error;

/// Failures reported by an [`ObjectStore`](crate::storage::ObjectStore) or
/// [`Table`](crate::storage::table::Table) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested key does not exist.
    #[error("object '{0}' not found")]
    NotFound(String),
    /// The backend did not answer within its deadline.
    #[error("storage operation on '{0}' timed out")]
    Timeout(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    /// Any other backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns `true` when the failure should be retried by a writer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StorageError::Timeout(_))
    }
}

/// Failures surfaced by [`ContentCache`](crate::cache::ContentCache).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Every write attempt for `key` timed out.
    #[error("write to '{key}' timed out after {attempts} attempts")]
    WriteTimeout { key: String, attempts: u32 },
}

/// Transport-level or HTTP-status failures while fetching a page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to '{url}' failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("'{url}' answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("fetch of '{0}' failed")]
    Other(String),
}

/// Redirects the vendor policy refuses to follow.
#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("redirect from '{from}' carries no usable Location header")]
    MissingLocation { from: String },
    #[error("redirect from '{from}' to '{to}' leaves the vendor domain")]
    Disallowed { from: String, to: String },
    #[error("too many redirects ({count}) while fetching '{url}'")]
    TooManyRedirects { url: String, count: usize },
}

/// Markup that the parsers could not account for.
#[derive(Debug, Error)]
pub enum ParseError {
    /// An element or text the parser does not recognize.
    #[error("unrecognized structure in {context}: {detail}")]
    Structural { context: String, detail: String },
    /// A selector expected to match at most one node matched several, or
    /// matched nothing where a node is mandatory.
    #[error("expected exactly one '{selector}', found {found}")]
    Cardinality { selector: String, found: usize },
    /// Children were left unconsumed when the parser finished a node.
    #[error("unconsumed markup left in {context}: {remainder}")]
    Unexhausted { context: String, remainder: String },
}

impl ParseError {
    pub fn structural(context: impl Into<String>, detail: impl Into<String>) -> Self {
        ParseError::Structural {
            context: context.into(),
            detail: detail.into(),
        }
    }
}

/// Failures delivering an operator notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notification endpoint answered with HTTP {0}")]
    Status(u16),
}

/// Failures reading or writing the error journal.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("malformed journal record '{key}': {detail}")]
    Malformed { key: String, detail: String },
}

/// Failures reading or writing named state items (cookies, last processed date).
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("malformed state item '{key}': {detail}")]
    Malformed { key: String, detail: String },
}

/// Failures loading the YAML configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Everything that can abort a single day's retrieval.
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Redirect(#[from] RedirectError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    State(#[from] StateError),
    /// A parse failure attributed to the article it came from.
    #[error("failed to process article '{url}': {source}")]
    Article {
        url: String,
        #[source]
        source: ParseError,
    },
    #[error("{0}")]
    Date(String),
    #[error("cannot encode processed document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to hand over article: {0}")]
    Sink(#[from] std::io::Error),
}

/// Render an error and its `source()` chain, one cause per line.
///
/// Used where an operator needs the full context of a failure, e.g. in
/// notification bodies.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        out.push_str("\n  caused by: ");
        out.push_str(&cause.to_string());
        current = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_timeout_classification() {
        assert!(StorageError::Timeout("k".into()).is_timeout());
        assert!(!StorageError::NotFound("k".into()).is_timeout());
        assert!(!StorageError::Backend("boom".into()).is_timeout());
    }

    #[test]
    fn test_article_error_mentions_url() {
        let err = RetrieveError::Article {
            url: "http://online.wsj.com/a".to_string(),
            source: ParseError::structural(".articlePage", "<img>"),
        };
        let msg = err.to_string();
        assert!(msg.contains("http://online.wsj.com/a"));
        assert!(msg.contains(".articlePage"));
    }

    #[test]
    fn test_error_chain_lists_causes() {
        let err = RetrieveError::Article {
            url: "u".to_string(),
            source: ParseError::Cardinality {
                selector: "h1".to_string(),
                found: 2,
            },
        };
        let chain = error_chain(&err);
        assert!(chain.starts_with("failed to process article 'u'"));
        assert!(chain.contains("caused by: expected exactly one 'h1', found 2"));
    }

    #[test]
    fn test_write_timeout_message() {
        let err = CacheError::WriteTimeout {
            key: "cache/wsj:article:raw/abc".to_string(),
            attempts: 4,
        };
        assert_eq!(
            err.to_string(),
            "write to 'cache/wsj:article:raw/abc' timed out after 4 attempts"
        );
    }
}
