use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StorageError;

/// Blob storage keyed by an opaque relative path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError>;
    async fn get(&self, path: &str) -> Result<Option<Bytes>, StorageError>;
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Public download URL for `path`, carrying the access token.
    fn public_url(&self, path: &str, token: &str) -> String;

    /// Inverse of [`BlobStore::public_url`]. `None` if the URL is not one of ours.
    fn path_from_url(&self, url: &str) -> Option<String>;
}

/// A stored document. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub newest_first: bool,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality filter.
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.filters
            .iter()
            .all(|(field, want)| record.fields.get(field) == Some(want))
    }
}

/// Structured record store with equality filters, timestamp ordering and limits.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, collection: &str, fields: Map<String, Value>) -> Result<Record, StorageError>;

    /// Merge `fields` into an existing record.
    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<(), StorageError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError>;

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StorageError>;

    async fn count(&self, collection: &str) -> Result<usize, StorageError>;
}

/// `{base}/{path}?token={token}`
pub fn blob_url(base: &str, path: &str, token: &str) -> String {
    format!("{}/{}?token={}", base.trim_end_matches('/'), path, token)
}

pub fn blob_path_from_url(base: &str, url: &str) -> Option<String> {
    let rest = url.strip_prefix(base.trim_end_matches('/'))?.strip_prefix('/')?;
    let path = rest.split(['?', '#']).next().unwrap_or("");
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_url_round_trips_path() {
        let url = blob_url("http://h:1/blobs/", "compressed/a.jpg", "tok");
        assert_eq!(url, "http://h:1/blobs/compressed/a.jpg?token=tok");
        assert_eq!(
            blob_path_from_url("http://h:1/blobs", &url).as_deref(),
            Some("compressed/a.jpg")
        );
    }

    #[test]
    fn test_foreign_url_has_no_path() {
        assert_eq!(blob_path_from_url("http://h:1/blobs", "https://cdn.other.com/x.jpg"), None);
        assert_eq!(blob_path_from_url("http://h:1/blobs", "http://h:1/blobs/?token=x"), None);
    }
}
