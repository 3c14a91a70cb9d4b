// Pristine originals kept for revert. Written once per canonical key, never mutated.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::traits::{BlobStore, Query, Record, RecordStore};
use crate::canonical::CanonicalKey;
use crate::config::ORIGINALS_COLLECTION;
use crate::detect::format::ImageFormat;
use crate::error::StorageError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalEntry {
    #[serde(skip)]
    pub id: String,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    pub canonical_key: CanonicalKey,
    pub stored_path: String,
    /// Required on `/blobs` downloads. Empty on entries written before tokens were kept.
    #[serde(default)]
    pub download_token: String,
    pub url: String,
    pub byte_size: u64,
    pub format: ImageFormat,
}

impl OriginalEntry {
    fn from_record(record: Record) -> Result<Self, StorageError> {
        let mut entry: Self = serde_json::from_value(Value::Object(record.fields))?;
        entry.id = record.id;
        entry.created_at = record.created_at;
        Ok(entry)
    }
}

pub struct OriginalArchive {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
}

impl OriginalArchive {
    pub fn new(blobs: Arc<dyn BlobStore>, records: Arc<dyn RecordStore>) -> Self {
        Self { blobs, records }
    }

    /// Oldest entry for `key`, i.e. the one written first.
    pub async fn find(&self, key: &CanonicalKey) -> Result<Option<OriginalEntry>, StorageError> {
        let query = Query::new().eq("canonicalKey", key.as_str());
        let first = self
            .records
            .query(ORIGINALS_COLLECTION, &query)
            .await?
            .into_iter()
            .min_by_key(|r| r.created_at);
        first.map(OriginalEntry::from_record).transpose()
    }

    /// Return the existing entry for `key`, or store `bytes` as its original.
    pub async fn ensure(&self, key: &CanonicalKey, bytes: Bytes, format: ImageFormat) -> Result<OriginalEntry, StorageError> {
        if let Some(existing) = self.find(key).await? {
            debug!("original already archived key={}", key);
            return Ok(existing);
        }

        let path = format!("originals/{}.{}", Uuid::new_v4(), format.extension());
        let token = Uuid::new_v4().to_string();
        let byte_size = bytes.len() as u64;
        self.blobs.put(&path, bytes, format.mime()).await?;

        let entry = OriginalEntry {
            id: String::new(),
            created_at: DateTime::<Utc>::default(),
            canonical_key: key.clone(),
            url: self.blobs.public_url(&path, &token),
            download_token: token,
            stored_path: path,
            byte_size,
            format,
        };
        let fields = match serde_json::to_value(&entry)? {
            Value::Object(map) => map,
            _ => {
                return Err(StorageError::Record {
                    collection: ORIGINALS_COLLECTION.to_string(),
                    message: "entry did not serialise to an object".to_string(),
                })
            }
        };
        let record = self.records.insert(ORIGINALS_COLLECTION, fields).await?;
        info!("archived original key={} bytes={}", key, byte_size);
        OriginalEntry::from_record(record)
    }

    /// Whether `token` is the download token of the original stored at `path`.
    pub async fn authorizes(&self, path: &str, token: &str) -> Result<bool, StorageError> {
        let query = Query::new()
            .eq("storedPath", path)
            .eq("downloadToken", token)
            .limit(1);
        Ok(!self.records.query(ORIGINALS_COLLECTION, &query).await?.is_empty())
    }

    /// Whether the archived blob is still present.
    pub async fn blob_exists(&self, entry: &OriginalEntry) -> Result<bool, StorageError> {
        self.blobs.exists(&entry.stored_path).await
    }
}
