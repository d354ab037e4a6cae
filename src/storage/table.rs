//! NoSQL-style item table.
//!
//! Items are addressed by a hash key and an optional range key and carry a
//! map of typed attributes (`S`, `N`, `SS`), mirroring the shape of the
//! external state table the pipeline was designed against.

use crate::error::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;
use tracing::{debug, instrument};

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(i64),
    SS(BTreeSet<String>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::N(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            AttributeValue::SS(set) => Some(set),
            _ => None,
        }
    }
}

/// Attributes of one item.
pub type Item = BTreeMap<String, AttributeValue>;

/// Primary key of an item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub hash: String,
    pub range: Option<String>,
}

impl ItemKey {
    pub fn hash(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            range: None,
        }
    }

    pub fn with_range(hash: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            range: Some(range.into()),
        }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.range {
            Some(range) => write!(f, "{}/{}", self.hash, range),
            None => f.write_str(&self.hash),
        }
    }
}

/// Item storage.
#[async_trait]
pub trait Table: Send + Sync {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StorageError>;
    async fn put(&self, key: &ItemKey, item: Item) -> Result<(), StorageError>;
    async fn delete(&self, key: &ItemKey) -> Result<(), StorageError>;
    /// All items sharing `hash`, ordered by range key.
    async fn query(&self, hash: &str) -> Result<Vec<(ItemKey, Item)>, StorageError>;
}

type Rows = BTreeMap<ItemKey, Item>;

fn query_rows(rows: &Rows, hash: &str) -> Vec<(ItemKey, Item)> {
    rows.iter()
        .filter(|(k, _)| k.hash == hash)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// [`Table`] kept in memory.
#[derive(Debug, Default)]
pub struct MemoryTable {
    rows: Mutex<Rows>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<std::sync::MutexGuard<'_, Rows>, StorageError> {
        self.rows
            .lock()
            .map_err(|_| StorageError::Backend("memory table lock poisoned".to_string()))
    }
}

#[async_trait]
impl Table for MemoryTable {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StorageError> {
        Ok(self.rows()?.get(key).cloned())
    }

    async fn put(&self, key: &ItemKey, item: Item) -> Result<(), StorageError> {
        self.rows()?.insert(key.clone(), item);
        Ok(())
    }

    async fn delete(&self, key: &ItemKey) -> Result<(), StorageError> {
        self.rows()?.remove(key);
        Ok(())
    }

    async fn query(&self, hash: &str) -> Result<Vec<(ItemKey, Item)>, StorageError> {
        let rows = self.rows()?;
        Ok(query_rows(&rows, hash))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TableFile {
    rows: Vec<(ItemKey, Item)>,
}

/// [`Table`] persisted as a single JSON file.
///
/// Every mutation reads the file, applies the change and rewrites it. The
/// pipeline is sequential, so there is no cross-writer coordination.
#[derive(Debug, Clone)]
pub struct JsonFileTable {
    path: PathBuf,
}

impl JsonFileTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<Rows, StorageError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Rows::new()),
            Err(e) => return Err(e.into()),
        };
        let file: TableFile = serde_json::from_slice(&raw)?;
        Ok(file.rows.into_iter().collect())
    }

    async fn save(&self, rows: Rows) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = TableFile {
            rows: rows.into_iter().collect(),
        };
        super::write_atomic(&self.path, &serde_json::to_vec_pretty(&file)?).await?;
        debug!(path = %self.path.display(), "Saved state table");
        Ok(())
    }
}

#[async_trait]
impl Table for JsonFileTable {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StorageError> {
        Ok(self.load().await?.remove(key))
    }

    #[instrument(level = "debug", skip(self, item), fields(%key))]
    async fn put(&self, key: &ItemKey, item: Item) -> Result<(), StorageError> {
        let mut rows = self.load().await?;
        rows.insert(key.clone(), item);
        self.save(rows).await
    }

    #[instrument(level = "debug", skip(self), fields(%key))]
    async fn delete(&self, key: &ItemKey) -> Result<(), StorageError> {
        let mut rows = self.load().await?;
        if rows.remove(key).is_some() {
            self.save(rows).await?;
        }
        Ok(())
    }

    async fn query(&self, hash: &str) -> Result<Vec<(ItemKey, Item)>, StorageError> {
        Ok(query_rows(&self.load().await?, hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(value: &str) -> Item {
        let mut item = Item::new();
        item.insert("value".to_string(), AttributeValue::S(value.to_string()));
        item
    }

    #[tokio::test]
    async fn test_json_file_table_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let key = ItemKey::hash("wsj-last_processed_date-20130825");

        JsonFileTable::new(&path).put(&key, item("2013-08-25")).await.unwrap();

        let reopened = JsonFileTable::new(&path);
        let got = reopened.get(&key).await.unwrap().unwrap();
        assert_eq!(got["value"].as_str(), Some("2013-08-25"));
    }

    #[tokio::test]
    async fn test_json_file_table_save_replaces_file_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let table = JsonFileTable::new(&path);
        table.put(&ItemKey::hash("a"), item("1")).await.unwrap();
        table.put(&ItemKey::hash("b"), item("2")).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
        let raw = std::fs::read(&path).unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_ok());
        assert_eq!(table.query("a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_query_filters_by_hash_and_orders_by_range() {
        let table = MemoryTable::new();
        table
            .put(&ItemKey::with_range("wsj-error", "2013-08-27"), item("b"))
            .await
            .unwrap();
        table
            .put(&ItemKey::with_range("wsj-error", "2013-08-25"), item("a"))
            .await
            .unwrap();
        table
            .put(&ItemKey::with_range("bloomberg-error", "2013-08-26"), item("c"))
            .await
            .unwrap();

        let rows = table.query("wsj-error").await.unwrap();
        let ranges: Vec<_> = rows.iter().map(|(k, _)| k.range.clone().unwrap()).collect();
        assert_eq!(ranges, vec!["2013-08-25", "2013-08-27"]);
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let table = JsonFileTable::new(dir.path().join("t.json"));
        table.delete(&ItemKey::hash("nothing")).await.unwrap();
        assert!(table.query("nothing").await.unwrap().is_empty());
    }

    #[test]
    fn test_item_key_display() {
        assert_eq!(ItemKey::hash("wsj_cookies").to_string(), "wsj_cookies");
        assert_eq!(
            ItemKey::with_range("wsj-error", "2013-08-25").to_string(),
            "wsj-error/2013-08-25"
        );
    }
}
