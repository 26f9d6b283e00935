//! Persistent fingerprint-keyed upload records.
//!
//! The engine persists one [`PersistedRecord`] per logical upload so a
//! later client instantiation can resume at the stored resource URL.
//! [`MemoryUrlStore`] keeps records for the lifetime of the process;
//! [`JsonFileUrlStore`] survives restarts by serializing to a JSON file.
use crate::error::{Error, Result};
use crate::metadata::Metadata;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::Mutex;

/// Opaque key naming one stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey(String);

impl StoreKey {
    /// Wrap a key produced by a store. Empty keys are rejected so a driver
    /// never holds a record it cannot delete.
    pub fn new<T: Into<String>>(key: T) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::storage("url store produced an empty key"));
        }
        Ok(Self(key))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StoreKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One stored upload, keyed by fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Total upload size when known at persistence time.
    pub size: Option<u64>,
    /// Copy of the upload's metadata.
    pub metadata: Metadata,
    /// RFC 3339 timestamp of when the record was created.
    pub creation_time: String,
    /// Resource URL of a contiguous upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    /// Part URLs of a parallel upload, in boundary order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_upload_urls: Option<Vec<String>>,
}

impl PersistedRecord {
    pub(crate) fn new(size: Option<u64>, metadata: Metadata) -> Self {
        Self {
            size,
            metadata,
            creation_time: chrono::Utc::now().to_rfc3339(),
            upload_url: None,
            parallel_upload_urls: None,
        }
    }
}

/// Stores upload records across driver instantiations.
///
/// Operations must be atomic at the record level; no cross-record
/// transactions are required.
pub trait UrlStore: Send + Sync {
    /// Every stored record.
    fn find_all(&self) -> BoxFuture<'_, Result<Vec<(StoreKey, PersistedRecord)>>>;

    /// Records stored under `fingerprint`.
    fn find_by_fingerprint<'a>(
        &'a self,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<Vec<(StoreKey, PersistedRecord)>>>;

    /// Store a record, returning the non-empty key that names it.
    fn add_upload<'a>(
        &'a self,
        fingerprint: &'a str,
        record: PersistedRecord,
    ) -> BoxFuture<'a, Result<StoreKey>>;

    /// Remove the record named by `key`. Removing an absent key is not an
    /// error.
    fn remove_upload<'a>(&'a self, key: &'a StoreKey) -> BoxFuture<'a, Result<()>>;
}

/// In-process [`UrlStore`] for tests and hosts without durable storage.
#[derive(Debug, Default)]
pub struct MemoryUrlStore {
    entries: RwLock<HashMap<String, (String, PersistedRecord)>>,
    next_key: AtomicU64,
}

impl MemoryUrlStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl UrlStore for MemoryUrlStore {
    fn find_all(&self) -> BoxFuture<'_, Result<Vec<(StoreKey, PersistedRecord)>>> {
        Box::pin(async move {
            let entries = self.entries.read().unwrap();
            entries
                .iter()
                .map(|(key, (_, record))| Ok((StoreKey::new(key.clone())?, record.clone())))
                .collect()
        })
    }

    fn find_by_fingerprint<'a>(
        &'a self,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<Vec<(StoreKey, PersistedRecord)>>> {
        Box::pin(async move {
            let entries = self.entries.read().unwrap();
            entries
                .iter()
                .filter(|(_, (fp, _))| fp == fingerprint)
                .map(|(key, (_, record))| Ok((StoreKey::new(key.clone())?, record.clone())))
                .collect()
        })
    }

    fn add_upload<'a>(
        &'a self,
        fingerprint: &'a str,
        record: PersistedRecord,
    ) -> BoxFuture<'a, Result<StoreKey>> {
        Box::pin(async move {
            let id = self.next_key.fetch_add(1, Ordering::Relaxed) + 1;
            let key = format!("memory-{id}");
            let mut entries = self.entries.write().unwrap();
            entries.insert(key.clone(), (fingerprint.to_string(), record));
            StoreKey::new(key)
        })
    }

    fn remove_upload<'a>(&'a self, key: &'a StoreKey) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut entries = self.entries.write().unwrap();
            entries.remove(key.as_str());
            Ok(())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonEntry {
    fingerprint: String,
    record: PersistedRecord,
}

/// [`UrlStore`] backed by a JSON file, surviving process restarts.
///
/// All operations serialize through one lock, so concurrent drivers sharing
/// a store see record-atomic reads and writes.
#[derive(Debug)]
pub struct JsonFileUrlStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileUrlStore {
    /// Use (and create on first write) the file at `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<HashMap<String, JsonEntry>> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(Error::storage),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(Error::storage(e)),
        }
    }

    async fn save(&self, entries: &HashMap<String, JsonEntry>) -> Result<()> {
        let raw = serde_json::to_vec_pretty(entries).map_err(Error::storage)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::storage)?;
        }
        tokio::fs::write(&self.path, raw).await.map_err(Error::storage)
    }
}

impl UrlStore for JsonFileUrlStore {
    fn find_all(&self) -> BoxFuture<'_, Result<Vec<(StoreKey, PersistedRecord)>>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let entries = self.load().await?;
            entries
                .into_iter()
                .map(|(key, entry)| Ok((StoreKey::new(key)?, entry.record)))
                .collect()
        })
    }

    fn find_by_fingerprint<'a>(
        &'a self,
        fingerprint: &'a str,
    ) -> BoxFuture<'a, Result<Vec<(StoreKey, PersistedRecord)>>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let entries = self.load().await?;
            entries
                .into_iter()
                .filter(|(_, entry)| entry.fingerprint == fingerprint)
                .map(|(key, entry)| Ok((StoreKey::new(key)?, entry.record)))
                .collect()
        })
    }

    fn add_upload<'a>(
        &'a self,
        fingerprint: &'a str,
        record: PersistedRecord,
    ) -> BoxFuture<'a, Result<StoreKey>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut entries = self.load().await?;
            let key = format!("tus-{}", uuid::Uuid::new_v4());
            entries.insert(
                key.clone(),
                JsonEntry {
                    fingerprint: fingerprint.to_string(),
                    record,
                },
            );
            self.save(&entries).await?;
            StoreKey::new(key)
        })
    }

    fn remove_upload<'a>(&'a self, key: &'a StoreKey) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut entries = self.load().await?;
            if entries.remove(key.as_str()).is_some() {
                self.save(&entries).await?;
            }
            Ok(())
        })
    }
}
