//! Content-addressable cache for raw and processed documents.
//!
//! Entries are keyed by `(topic, date partition, sha256(url))` and stored in
//! an [`ObjectStore`] as `{prefix}{topic}/{partition}{hex digest}`. The URL is
//! hashed exactly as given; no normalization happens before hashing.
//!
//! # Freshness
//!
//! [`ContentCache::lookup`] optionally takes a [`Cutoff`]: a hit whose
//! metadata field is missing, unparseable or older than the cutoff is
//! reported as a miss. Version gating of processed entries is the caller's
//! concern (see [`crate::retriever`]).
//!
//! # Write retries
//!
//! Each write attempt is bounded by a timeout. Timed-out attempts are retried
//! until the attempt budget is spent (4 by default), then surfaced as
//! [`CacheError::WriteTimeout`]. Any other storage error is returned at once.

use crate::error::{CacheError, StorageError};
use crate::storage::{ObjectStore, StorageClass, StoredObject};
use crate::utils::parse_iso;
use chrono::{DateTime, Utc};
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, instrument, warn};

/// Metadata field holding the fetch time of raw entries.
pub const RETRIEVAL_TIME: &str = "retrieval_time";
/// Metadata field holding the parse time of processed entries.
pub const PROCESSED_TIME: &str = "processed_time";
pub const WEBSITE_VERSION: &str = "website_version";
pub const PROCESSOR_VERSION: &str = "processor_version";
pub const URL: &str = "url";
pub const LOCAL_DATE: &str = "local_date";

/// Deterministic address of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub topic: String,
    pub date_partition: String,
    /// Lowercase hex SHA-256 of the URL string.
    pub url_hash: String,
}

impl CacheKey {
    pub fn new(topic: &str, date_partition: &str, url: &str) -> Self {
        Self {
            topic: topic.to_string(),
            date_partition: date_partition.to_string(),
            url_hash: format!("{:x}", Sha256::digest(url.as_bytes())),
        }
    }

    /// Storage key under `prefix`.
    pub fn storage_key(&self, prefix: &str) -> String {
        format!(
            "{}{}/{}{}",
            prefix, self.topic, self.date_partition, self.url_hash
        )
    }
}

/// Kind of document stored in an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Html,
    Json,
}

impl ContentType {
    pub fn mime(self) -> &'static str {
        match self {
            ContentType::Html => "text/html",
            ContentType::Json => "application/json",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.split(';').next().map(str::trim) {
            Some("text/html") => Some(ContentType::Html),
            Some("application/json") => Some(ContentType::Json),
            _ => None,
        }
    }
}

/// A cached document and its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub content: Vec<u8>,
    pub content_type: Option<ContentType>,
    pub metadata: BTreeMap<String, String>,
}

impl CacheEntry {
    pub fn meta(&self, field: &str) -> Option<&str> {
        self.metadata.get(field).map(String::as_str)
    }
}

/// Freshness requirement for a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoff<'a> {
    pub at: DateTime<Utc>,
    /// Metadata field holding the entry's timestamp.
    pub field: &'a str,
}

impl<'a> Cutoff<'a> {
    pub fn new(at: DateTime<Utc>, field: &'a str) -> Self {
        Self { at, field }
    }

    fn admits(&self, entry: &CacheEntry) -> bool {
        entry
            .meta(self.field)
            .and_then(parse_iso)
            .is_some_and(|ts| ts >= self.at)
    }
}

/// Whether an entry may be stored with reduced redundancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Standard,
    Reduced,
}

impl From<Durability> for StorageClass {
    fn from(d: Durability) -> Self {
        match d {
            Durability::Standard => StorageClass::Standard,
            Durability::Reduced => StorageClass::ReducedRedundancy,
        }
    }
}

/// Write retry settings.
#[derive(Debug, Clone, Copy)]
pub struct WritePolicy {
    /// Deadline for a single write attempt.
    pub attempt_timeout: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Upper bound of the random pause between attempts.
    pub max_jitter: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(5),
            max_attempts: 4,
            max_jitter: Duration::from_millis(250),
        }
    }
}

/// Cache of raw and processed documents on top of an [`ObjectStore`].
pub struct ContentCache {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    policy: WritePolicy,
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("prefix", &self.prefix)
            .field("policy", &self.policy)
            .finish()
    }
}

impl ContentCache {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, policy: WritePolicy) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            policy,
        }
    }

    /// Read the entry for `(topic, date_partition, url)`.
    ///
    /// Returns `Ok(None)` on a miss, including entries rejected by `cutoff`.
    /// Storage failures other than not-found are propagated.
    #[instrument(level = "debug", skip(self, cutoff), fields(%topic, %date_partition, %url))]
    pub async fn lookup(
        &self,
        topic: &str,
        date_partition: &str,
        url: &str,
        cutoff: Option<Cutoff<'_>>,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let key = CacheKey::new(topic, date_partition, url).storage_key(&self.prefix);
        let object = match self.store.get(&key).await {
            Ok(object) => object,
            Err(StorageError::NotFound(_)) => {
                debug!(%key, "Cache miss");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let entry = CacheEntry {
            content: object.body,
            content_type: ContentType::from_mime(&object.content_type),
            metadata: object.metadata,
        };

        if let Some(cutoff) = cutoff {
            if !cutoff.admits(&entry) {
                debug!(
                    %key,
                    field = cutoff.field,
                    cutoff = %cutoff.at,
                    stamp = ?entry.meta(cutoff.field),
                    "Cache entry older than cutoff"
                );
                return Ok(None);
            }
        }

        debug!(%key, bytes = entry.content.len(), "Cache hit");
        Ok(Some(entry))
    }

    /// Write `content` and `metadata` for `(topic, date_partition, url)`.
    #[allow(clippy::too_many_arguments)]
    #[instrument(level = "debug", skip(self, content, metadata), fields(%topic, %date_partition, %url, bytes = content.len()))]
    pub async fn store(
        &self,
        topic: &str,
        date_partition: &str,
        url: &str,
        content: &[u8],
        content_type: ContentType,
        metadata: BTreeMap<String, String>,
        durability: Durability,
    ) -> Result<(), CacheError> {
        let key = CacheKey::new(topic, date_partition, url).storage_key(&self.prefix);
        let object = StoredObject {
            body: content.to_vec(),
            content_type: content_type.mime().to_string(),
            metadata,
            storage_class: durability.into(),
        };

        let total_t0 = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = timeout(
                self.policy.attempt_timeout,
                self.store.put(&key, object.clone()),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {
                    debug!(%key, attempt, "Stored cache entry");
                    return Ok(());
                }
                Ok(Err(e)) if !e.is_timeout() => {
                    error!(%key, attempt, error = %e, "Cache write failed");
                    return Err(e.into());
                }
                Ok(Err(_)) | Err(_) => {
                    let elapsed_ms_total = total_t0.elapsed().as_millis();
                    if attempt >= self.policy.max_attempts {
                        error!(
                            %key,
                            attempt,
                            max = self.policy.max_attempts,
                            elapsed_ms_total,
                            "Cache write exhausted retries"
                        );
                        return Err(CacheError::WriteTimeout {
                            key,
                            attempts: attempt,
                        });
                    }
                    let jitter_ms = self.policy.max_jitter.as_millis() as u64;
                    let delay = Duration::from_millis(rng().random_range(0..=jitter_ms));
                    warn!(
                        %key,
                        attempt,
                        max = self.policy.max_attempts,
                        elapsed_ms_total,
                        ?delay,
                        "Cache write timed out; retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
