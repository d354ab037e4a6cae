//! Journal of failed daily retrievals.
//!
//! Every day whose run aborts leaves an [`ErrorRecord`] in the state table,
//! keyed by `("{vendor}-error", date)`. The cleanup pass
//! ([`Retriever::cleanup_status`](crate::retriever::Retriever::cleanup_status))
//! replays those days once the parser has been fixed, marks each attempt with
//! the patch that tried it, and deletes records that finally succeed or whose
//! processor version has been superseded.

use crate::error::JournalError;
use crate::notify::Notifier;
use crate::storage::table::{AttributeValue, Item, ItemKey, Table};
use crate::utils::{iso_millis, parse_iso};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

const PROCESSOR_VERSION: &str = "processor_version";
const PROCESSOR_PATCH: &str = "processor_patch";
const LOGGED_AT: &str = "logged_at";
const FIX_PATCH: &str = "fix_patch";

/// Hash key under which a vendor's error records live.
pub fn error_topic(vendor: &str) -> String {
    format!("{vendor}-error")
}

/// One failed day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub topic: String,
    pub date: NaiveDate,
    pub processor_version: String,
    pub processor_patch: u32,
    pub logged_at: DateTime<Utc>,
    /// Patch of the last cleanup pass that replayed this day.
    pub fix_patch: Option<u32>,
}

impl ErrorRecord {
    fn key(&self) -> ItemKey {
        ItemKey::with_range(&self.topic, self.date.to_string())
    }

    fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(
            PROCESSOR_VERSION.to_string(),
            AttributeValue::S(self.processor_version.clone()),
        );
        item.insert(
            PROCESSOR_PATCH.to_string(),
            AttributeValue::N(i64::from(self.processor_patch)),
        );
        item.insert(LOGGED_AT.to_string(), AttributeValue::S(iso_millis(self.logged_at)));
        if let Some(fix) = self.fix_patch {
            item.insert(FIX_PATCH.to_string(), AttributeValue::N(i64::from(fix)));
        }
        item
    }

    fn from_item(key: &ItemKey, item: &Item) -> Result<Self, JournalError> {
        let malformed = |detail: &str| JournalError::Malformed {
            key: key.to_string(),
            detail: detail.to_string(),
        };
        let range = key.range.as_deref().ok_or_else(|| malformed("missing date"))?;
        let date = range.parse().map_err(|_| malformed("bad date"))?;
        let processor_version = item
            .get(PROCESSOR_VERSION)
            .and_then(AttributeValue::as_str)
            .ok_or_else(|| malformed("missing processor_version"))?
            .to_string();
        let processor_patch = item
            .get(PROCESSOR_PATCH)
            .and_then(AttributeValue::as_i64)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| malformed("missing processor_patch"))?;
        let logged_at = item
            .get(LOGGED_AT)
            .and_then(AttributeValue::as_str)
            .and_then(parse_iso)
            .ok_or_else(|| malformed("missing logged_at"))?;
        let fix_patch = item
            .get(FIX_PATCH)
            .and_then(AttributeValue::as_i64)
            .and_then(|n| u32::try_from(n).ok());

        Ok(Self {
            topic: key.hash.clone(),
            date,
            processor_version,
            processor_patch,
            logged_at,
            fix_patch,
        })
    }
}

/// Error records plus the operator notification channel.
#[derive(Clone)]
pub struct ErrorJournal {
    table: Arc<dyn Table>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl std::fmt::Debug for ErrorJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorJournal")
            .field("notify", &self.notifier.is_some())
            .finish()
    }
}

impl ErrorJournal {
    /// `notifier = None` disables notifications.
    pub fn new(table: Arc<dyn Table>, notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self { table, notifier }
    }

    /// Write (or overwrite) the record for `(topic, date)`.
    #[instrument(level = "info", skip(self), fields(%topic, %date))]
    pub async fn record(
        &self,
        topic: &str,
        date: NaiveDate,
        processor_version: &str,
        processor_patch: u32,
    ) -> Result<ErrorRecord, JournalError> {
        let record = ErrorRecord {
            topic: topic.to_string(),
            date,
            processor_version: processor_version.to_string(),
            processor_patch,
            logged_at: Utc::now(),
            fix_patch: None,
        };
        self.table.put(&record.key(), record.to_item()).await?;
        info!("Recorded failed retrieval");
        Ok(record)
    }

    /// All records under `topic`, ordered by date.
    pub async fn records(&self, topic: &str) -> Result<Vec<ErrorRecord>, JournalError> {
        self.table
            .query(topic)
            .await?
            .iter()
            .map(|(key, item)| ErrorRecord::from_item(key, item))
            .collect()
    }

    /// Tag `record` as replayed by `patch`.
    #[instrument(level = "info", skip_all, fields(topic = %record.topic, date = %record.date, patch = patch))]
    pub async fn mark_potentially_fixed(&self, record: &ErrorRecord, patch: u32) -> Result<ErrorRecord, JournalError> {
        let key = record.key();
        // The replay may have rewritten the record; tag the stored one.
        let mut current = match self.table.get(&key).await? {
            Some(item) => ErrorRecord::from_item(&key, &item)?,
            None => record.clone(),
        };
        current.fix_patch = Some(patch);
        self.table.put(&key, current.to_item()).await?;
        Ok(current)
    }

    /// Delete a record whose day has been processed successfully.
    pub async fn resolve(&self, record: &ErrorRecord) -> Result<(), JournalError> {
        self.table.delete(&record.key()).await?;
        info!(topic = %record.topic, date = %record.date, "Resolved failed retrieval");
        Ok(())
    }

    /// Delete every record under `topic` matching `predicate`; returns the
    /// records that survive.
    pub async fn prune<P>(&self, topic: &str, mut predicate: P) -> Result<Vec<ErrorRecord>, JournalError>
    where
        P: FnMut(&ErrorRecord) -> bool,
    {
        let mut kept = Vec::new();
        for record in self.records(topic).await? {
            if predicate(&record) {
                self.table.delete(&record.key()).await?;
                info!(date = %record.date, version = %record.processor_version, "Pruned error record");
            } else {
                kept.push(record);
            }
        }
        Ok(kept)
    }

    /// Publish `summary`; failures are logged, never returned.
    pub async fn notify(&self, subject: &str, summary: &str) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(e) = notifier.publish(subject, summary).await {
            warn!(error = %e, %subject, "Failed to deliver operator notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifyError;
    use crate::storage::table::MemoryTable;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn publish(&self, subject: &str, message: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), message.to_string()));
            if self.fail {
                Err(NotifyError::Status(500))
            } else {
                Ok(())
            }
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2013, 8, d).unwrap()
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let journal = ErrorJournal::new(Arc::new(MemoryTable::new()), None);
        let written = journal.record("wsj-error", date(25), "20130825", 2).await.unwrap();

        let records = journal.records("wsj-error").await.unwrap();
        assert_eq!(records.len(), 1);
        let read = &records[0];
        assert_eq!(read.date, date(25));
        assert_eq!(read.processor_version, "20130825");
        assert_eq!(read.processor_patch, 2);
        assert_eq!(read.fix_patch, None);
        // logged_at round-trips at millisecond precision
        assert_eq!(
            read.logged_at.timestamp_millis(),
            written.logged_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_mark_potentially_fixed_sets_fix_patch() {
        let journal = ErrorJournal::new(Arc::new(MemoryTable::new()), None);
        let record = journal.record("wsj-error", date(25), "20130825", 0).await.unwrap();
        journal.mark_potentially_fixed(&record, 3).await.unwrap();

        let records = journal.records("wsj-error").await.unwrap();
        assert_eq!(records[0].fix_patch, Some(3));
    }

    #[tokio::test]
    async fn test_prune_deletes_matching_records() {
        let journal = ErrorJournal::new(Arc::new(MemoryTable::new()), None);
        journal.record("wsj-error", date(24), "20130801", 0).await.unwrap();
        journal.record("wsj-error", date(25), "20130825", 0).await.unwrap();

        let kept = journal
            .prune("wsj-error", |r| r.processor_version == "20130801")
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].date, date(25));
        assert_eq!(journal.records("wsj-error").await.unwrap(), kept);
    }

    #[tokio::test]
    async fn test_resolve_deletes_record() {
        let journal = ErrorJournal::new(Arc::new(MemoryTable::new()), None);
        let record = journal.record("wsj-error", date(25), "20130825", 0).await.unwrap();
        journal.resolve(&record).await.unwrap();
        assert!(journal.records("wsj-error").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notify_failure_is_swallowed() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let journal = ErrorJournal::new(Arc::new(MemoryTable::new()), Some(notifier.clone()));
        journal.notify("subject", "summary").await;
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_item_is_reported() {
        let table = Arc::new(MemoryTable::new());
        table
            .put(&ItemKey::with_range("wsj-error", "not-a-date"), Item::new())
            .await
            .unwrap();
        let journal = ErrorJournal::new(table, None);
        let err = journal.records("wsj-error").await.unwrap_err();
        assert!(matches!(err, JournalError::Malformed { .. }));
    }
}
