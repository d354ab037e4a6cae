//! Narrow storage contracts used by the cache and the state/journal items.
//!
//! The pipeline never talks to a concrete storage client directly. It sees
//! two small traits:
//!
//! - [`ObjectStore`]: blob storage with string metadata, backing
//!   [`ContentCache`](crate::cache::ContentCache)
//! - [`table::Table`]: a NoSQL-style item table, backing cookies, the
//!   last-processed-date marker and the error journal
//!
//! Both are object safe (`async-trait`) so the retriever can hold them as
//! `Arc<dyn ...>` regardless of the backend chosen at startup.
//!
//! # Backends
//!
//! | Backend | Trait | Notes |
//! |---------|-------|-------|
//! | [`FsObjectStore`] | `ObjectStore` | Directory tree, JSON metadata sidecar per object |
//! | [`MemoryObjectStore`] | `ObjectStore` | Process-local map |
//! | [`table::JsonFileTable`] | `Table` | Whole table kept in one JSON file |
//! | [`table::MemoryTable`] | `Table` | Process-local map |

pub mod table;

use crate::error::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// How much redundancy the backend should spend on an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    #[default]
    Standard,
    /// Cheaper storage for content that can be regenerated.
    ReducedRedundancy,
}

/// An object as handed to and returned from an [`ObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    /// MIME type, e.g. `text/html`.
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
    pub storage_class: StorageClass,
}

/// Key/value blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the object stored under `key`.
    ///
    /// Returns [`StorageError::NotFound`] when nothing is stored there.
    async fn get(&self, key: &str) -> Result<StoredObject, StorageError>;

    /// Write `object` under `key`, replacing any previous object wholesale.
    async fn put(&self, key: &str, object: StoredObject) -> Result<(), StorageError>;
}

/// Sidecar written next to each object by [`FsObjectStore`].
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    storage_class: StorageClass,
    metadata: BTreeMap<String, String>,
}

/// [`ObjectStore`] rooted at a local directory.
///
/// Keys map to relative paths (`/` separates directories). The body is
/// written to the key's path and the metadata to `<path>.meta.json`; both
/// are replaced by rename and the sidecar goes last, so an object without
/// one is treated as absent.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn body_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(sanitize_segment(segment));
        }
        path
    }

    fn sidecar_path(body: &Path) -> PathBuf {
        let mut name = body.file_name().unwrap_or_default().to_os_string();
        name.push(".meta.json");
        body.with_file_name(name)
    }
}

/// Replace `path` with `bytes` through a temporary sibling and a rename, so
/// readers see either the old file or the new one, never a partial write.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut name = std::ffi::OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    let tmp = path.with_file_name(name);
    let written = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        fs::rename(&tmp, path).await
    }
    .await;
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Replace characters that are awkward in file names on common platforms.
fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            ':' | '\\' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        let body_path = self.body_path(key);
        let sidecar_raw = match fs::read(Self::sidecar_path(&body_path)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let sidecar: Sidecar = serde_json::from_slice(&sidecar_raw)?;
        let body = match fs::read(&body_path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        debug!(bytes = body.len(), "Read object from disk");
        Ok(StoredObject {
            body,
            content_type: sidecar.content_type,
            metadata: sidecar.metadata,
            storage_class: sidecar.storage_class,
        })
    }

    #[instrument(level = "debug", skip(self, object), fields(bytes = object.body.len()))]
    async fn put(&self, key: &str, object: StoredObject) -> Result<(), StorageError> {
        let body_path = self.body_path(key);
        if let Some(parent) = body_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_atomic(&body_path, &object.body).await?;
        let sidecar = Sidecar {
            content_type: object.content_type,
            storage_class: object.storage_class,
            metadata: object.metadata,
        };
        write_atomic(&Self::sidecar_path(&body_path), &serde_json::to_vec(&sidecar)?).await?;
        Ok(())
    }
}

/// [`ObjectStore`] kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Backend("memory store lock poisoned".to_string())
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        let objects = self.objects.lock().map_err(poisoned)?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, object: StoredObject) -> Result<(), StorageError> {
        let mut objects = self.objects.lock().map_err(poisoned)?;
        objects.insert(key.to_string(), object);
        Ok(())
    }
}
