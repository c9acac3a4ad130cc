//! Flat JSON document store.
//!
//! Documents live at `<base>/<collection>/<key>.json` and are always
//! rewritten wholesale. A write goes to a hidden temporary sibling which is
//! fsynced and then renamed over the target, so readers see either the old
//! or the new document and never a torn one.
//!
//! The store has no business logic. Callers that need read-modify-write
//! take [`DocumentStore::lock`] for the key first; locks for different keys
//! are independent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};

const DOCUMENT_EXT: &str = "json";

type KeyLocks = HashMap<(String, String), Arc<Mutex<()>>>;

/// Reject anything that is not a single plain path segment.
fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment.starts_with('.')
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains('\0')
        || segment.contains("..")
    {
        return Err(StoreError::InvalidKey(segment.to_string()));
    }
    Ok(())
}

#[derive(Debug)]
pub struct DocumentStore {
    base_path: PathBuf,
    locks: Mutex<KeyLocks>,
}

impl DocumentStore {
    /// Open a store rooted at `base_path`, creating the directory if missing.
    pub async fn open(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| StoreError::io(&base_path, e))?;

        info!(path = %base_path.display(), "Document store initialized");

        Ok(Self {
            base_path,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn collection_path(&self, collection: &str) -> Result<PathBuf> {
        validate_segment(collection)?;
        Ok(self.base_path.join(collection))
    }

    fn document_path(&self, collection: &str, key: &str) -> Result<PathBuf> {
        validate_segment(key)?;
        Ok(self
            .collection_path(collection)?
            .join(format!("{key}.{DOCUMENT_EXT}")))
    }

    /// Acquire the exclusive section for one document.
    ///
    /// Hold the guard across "read, modify, put" so concurrent writers of
    /// the same key cannot overwrite each other's changes.
    pub async fn lock(&self, collection: &str, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            // Drop sections nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((collection.to_string(), key.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }

    /// Read a document. `Ok(None)` when it does not exist.
    pub async fn get<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<Option<T>> {
        let path = self.document_path(collection, key)?;

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let value = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            collection: collection.to_string(),
            key: key.to_string(),
            source,
        })?;

        debug!(collection, key, size = bytes.len(), "Read document");
        Ok(Some(value))
    }

    /// Write a document, replacing any previous version. Returns once the
    /// new contents and the rename are flushed to disk.
    pub async fn put<T: Serialize>(&self, collection: &str, key: &str, value: &T) -> Result<()> {
        let path = self.document_path(collection, key)?;
        let dir = self.collection_path(collection)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp_path = dir.join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()));

        if let Err(e) = write_synced(&tmp_path, &bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::io(&tmp_path, e));
        }

        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::io(&path, e));
        }
        sync_dir(&dir).await.map_err(|e| StoreError::io(&dir, e))?;

        debug!(collection, key, size = bytes.len(), "Wrote document");
        Ok(())
    }

    /// Delete a document. Returns whether it existed.
    pub async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let path = self.document_path(collection, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(collection, key, "Deleted document");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Keys of every document in a collection. A missing collection is empty.
    pub async fn keys(&self, collection: &str) -> Result<Vec<String>> {
        let dir = self.collection_path(collection)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(&format!(".{DOCUMENT_EXT}")) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Read every document in a collection.
    ///
    /// Documents that fail to parse are skipped with a warning so that one
    /// corrupt file does not hide the rest of the collection.
    pub async fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for key in self.keys(collection).await? {
            match self.get(collection, &key).await {
                Ok(Some(value)) => values.push(value),
                // Deleted between listing and reading.
                Ok(None) => {}
                Err(e @ StoreError::Corrupt { .. }) => {
                    warn!(collection, key = %key, error = %e, "Skipping unreadable document");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Flush a directory entry so a completed rename survives power loss.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
