// Record store persisted as one JSON document, rewritten atomically after each mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::memory::MemoryRecordStore;
use super::traits::{Query, Record, RecordStore};
use crate::error::StorageError;

pub struct JsonFileRecordStore {
    inner: MemoryRecordStore,
    path: PathBuf,
    /// Serialises snapshot writes so an older snapshot never overwrites a newer one.
    write_lock: Mutex<()>,
}

impl JsonFileRecordStore {
    /// Load `path` if it exists, otherwise start empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let collections: HashMap<String, Vec<Record>> = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(file_error(&path, e)),
        };
        info!(
            "record store opened path={} collections={}",
            path.display(),
            collections.len()
        );
        Ok(Self {
            inner: MemoryRecordStore::from_collections(collections),
            path,
            write_lock: Mutex::new(()),
        })
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let data = serde_json::to_vec(&self.inner.snapshot())?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| file_error(&self.path, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| file_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| file_error(&self.path, e))?;
        debug!("record store flushed bytes={}", data.len());
        Ok(())
    }
}

fn file_error(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Record {
        collection: "*".to_string(),
        message: format!("{}: {e}", path.display()),
    }
}

#[async_trait]
impl RecordStore for JsonFileRecordStore {
    async fn insert(&self, collection: &str, fields: Map<String, Value>) -> Result<Record, StorageError> {
        let record = self.inner.insert(collection, fields).await?;
        self.flush().await?;
        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<(), StorageError> {
        self.inner.update(collection, id, fields).await?;
        self.flush().await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError> {
        self.inner.delete(collection, id).await?;
        self.flush().await
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StorageError> {
        self.inner.query(collection, query).await
    }

    async fn count(&self, collection: &str) -> Result<usize, StorageError> {
        self.inner.count(collection).await
    }
}
