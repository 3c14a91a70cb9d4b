// In-memory persistence backends. Used by tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::traits::{blob_path_from_url, blob_url, BlobStore, Query, Record, RecordStore};
use crate::error::StorageError;

pub struct MemoryBlobStore {
    base_url: String,
    blobs: RwLock<HashMap<String, (Bytes, String)>>,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.blobs.read().keys().cloned().collect()
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.blobs.read().get(path).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError> {
        self.blobs
            .write()
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.blobs.read().get(path).map(|(b, _)| b.clone()))
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.read().contains_key(path))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.blobs.write().remove(path);
        Ok(())
    }

    fn public_url(&self, path: &str, token: &str) -> String {
        blob_url(&self.base_url, path, token)
    }

    fn path_from_url(&self, url: &str) -> Option<String> {
        blob_path_from_url(&self.base_url, url)
    }
}

/// Collections of records kept in insertion order.
#[derive(Default)]
pub struct MemoryRecordStore {
    collections: RwLock<HashMap<String, Vec<Record>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_collections(collections: HashMap<String, Vec<Record>>) -> Self {
        Self {
            collections: RwLock::new(collections),
        }
    }

    pub fn snapshot(&self) -> HashMap<String, Vec<Record>> {
        self.collections.read().clone()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, collection: &str, fields: Map<String, Value>) -> Result<Record, StorageError> {
        let record = Record {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            fields,
        };
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<(), StorageError> {
        let mut collections = self.collections.write();
        let record = collections
            .get_mut(collection)
            .and_then(|records| records.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| StorageError::Record {
                collection: collection.to_string(),
                message: format!("no record {id}"),
            })?;
        record.fields.extend(fields);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError> {
        if let Some(records) = self.collections.write().get_mut(collection) {
            records.retain(|r| r.id != id);
        }
        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StorageError> {
        let collections = self.collections.read();
        let Some(records) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<Record> = records.iter().filter(|r| query.matches(r)).cloned().collect();
        if query.newest_first {
            // Reverse first so equal timestamps keep the later insert ahead.
            hits.reverse();
            hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize, StorageError> {
        Ok(self.collections.read().get(collection).map_or(0, Vec::len))
    }
}
