// Compressed artifact cache: blob + metadata record, existence-verified on every lookup.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::traits::{BlobStore, Query, Record, RecordStore};
use crate::canonical::{canonical, CanonicalKey};
use crate::codec::Strategy;
use crate::config::COMPRESSED_COLLECTION;
use crate::detect::format::ImageFormat;
use crate::error::StorageError;

const FIELD_CANONICAL_KEY: &str = "canonicalKey";
const FIELD_EXTERNAL_IMAGE_ID: &str = "externalImageId";
const FIELD_SWAPPED_KEY: &str = "swappedKey";
const FIELD_ARTIFACT_KEY: &str = "artifactKey";
const FIELD_STORAGE_PATH: &str = "storagePath";
const FIELD_DOWNLOAD_TOKEN: &str = "downloadToken";

/// Metadata record for one stored compressed blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedArtifact {
    #[serde(skip)]
    pub id: String,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    pub canonical_key: CanonicalKey,
    /// May be absent on records written before paths were recorded.
    #[serde(default)]
    pub storage_path: Option<String>,
    pub download_token: String,
    pub url: String,
    pub byte_size: u64,
    pub format: ImageFormat,
    pub original_byte_size: u64,
    pub strategy_used: Strategy,
    /// Origin image id this artifact is live under, once swapped.
    #[serde(default)]
    pub external_image_id: Option<String>,
    /// Canonical form of the live origin URL, once swapped.
    #[serde(default)]
    pub swapped_key: Option<CanonicalKey>,
    /// Canonical form of `url`, so callers can re-submit our own links.
    pub artifact_key: CanonicalKey,
}

impl CompressedArtifact {
    fn from_record(record: Record) -> Result<Self, StorageError> {
        let mut artifact: Self = serde_json::from_value(Value::Object(record.fields))?;
        artifact.id = record.id;
        artifact.created_at = record.created_at;
        Ok(artifact)
    }

    fn to_fields(&self) -> Result<Map<String, Value>, StorageError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(StorageError::Record {
                collection: COMPRESSED_COLLECTION.to_string(),
                message: "artifact did not serialise to an object".to_string(),
            }),
        }
    }
}

/// Describes the bytes handed to [`CacheStore::put`].
#[derive(Debug, Clone, Copy)]
pub struct ArtifactMeta {
    pub format: ImageFormat,
    pub original_byte_size: u64,
    pub strategy: Strategy,
}

/// Ephemeral view of a lookup. Never persisted.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub artifact: CompressedArtifact,
    /// The referenced blob was confirmed to exist during this lookup.
    pub blob_verified: bool,
    /// `storage_path` was derived from the URL and written back.
    pub path_backfilled: bool,
}

pub struct CacheStore {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
}

impl CacheStore {
    pub fn new(blobs: Arc<dyn BlobStore>, records: Arc<dyn RecordStore>) -> Self {
        Self { blobs, records }
    }

    /// Write a uniquely named blob plus its record. Later puts for the same key supersede.
    pub async fn put(&self, key: &CanonicalKey, buffer: Bytes, meta: ArtifactMeta) -> Result<CompressedArtifact, StorageError> {
        let path = format!("compressed/{}.{}", Uuid::new_v4(), meta.format.extension());
        let token = Uuid::new_v4().to_string();
        let byte_size = buffer.len() as u64;

        self.blobs.put(&path, buffer, meta.format.mime()).await?;
        let url = self.blobs.public_url(&path, &token);

        let mut artifact = CompressedArtifact {
            id: String::new(),
            created_at: DateTime::<Utc>::default(),
            canonical_key: key.clone(),
            storage_path: Some(path.clone()),
            download_token: token,
            artifact_key: canonical(&url),
            url,
            byte_size,
            format: meta.format,
            original_byte_size: meta.original_byte_size,
            strategy_used: meta.strategy,
            external_image_id: None,
            swapped_key: None,
        };

        let record = match self.records.insert(COMPRESSED_COLLECTION, artifact.to_fields()?).await {
            Ok(r) => r,
            Err(e) => {
                // Do not leave an unreferenced blob behind.
                if let Err(cleanup) = self.blobs.delete(&path).await {
                    warn!("orphan blob cleanup failed path={}: {}", path, cleanup);
                }
                return Err(e);
            }
        };
        artifact.id = record.id;
        artifact.created_at = record.created_at;

        info!(
            "cached artifact key={} path={} bytes={} original={}",
            key, path, artifact.byte_size, artifact.original_byte_size
        );
        Ok(artifact)
    }

    /// Look up the current artifact for `key`.
    ///
    /// Precedence: external image id, canonical key, previously swapped-to URL, the
    /// artifact's own URL. The first matching record is verified against the blob store;
    /// a record whose blob is gone is deleted and the lookup reports a miss.
    pub async fn get(&self, key: &CanonicalKey, external_id: Option<&str>) -> Result<Option<CacheLookup>, StorageError> {
        let mut probes: Vec<(&str, &str)> = Vec::with_capacity(4);
        if let Some(id) = external_id.filter(|id| !id.is_empty()) {
            probes.push((FIELD_EXTERNAL_IMAGE_ID, id));
        }
        probes.push((FIELD_CANONICAL_KEY, key.as_str()));
        probes.push((FIELD_SWAPPED_KEY, key.as_str()));
        probes.push((FIELD_ARTIFACT_KEY, key.as_str()));

        for (field, value) in probes {
            if let Some(record) = self.latest(field, value).await? {
                debug!("cache record match key={} via {}", key, field);
                return self.verify(record).await;
            }
        }
        debug!("cache miss key={}", key);
        Ok(None)
    }

    /// Latest record for `key` without touching the blob store.
    pub async fn find(&self, key: &CanonicalKey) -> Result<Option<CacheLookup>, StorageError> {
        let Some(record) = self.latest(FIELD_CANONICAL_KEY, key.as_str()).await? else {
            return Ok(None);
        };
        Ok(Some(CacheLookup {
            artifact: CompressedArtifact::from_record(record)?,
            blob_verified: false,
            path_backfilled: false,
        }))
    }

    /// Remember where the artifact went live at the origin.
    pub async fn record_swap(&self, artifact: &CompressedArtifact, image_id: &str, live_url: Option<&str>) -> Result<(), StorageError> {
        let mut fields = Map::new();
        fields.insert(FIELD_EXTERNAL_IMAGE_ID.to_string(), json!(image_id));
        if let Some(url) = live_url {
            fields.insert(FIELD_SWAPPED_KEY.to_string(), json!(canonical(url)));
        }
        self.records.update(COMPRESSED_COLLECTION, &artifact.id, fields).await
    }

    pub async fn clear_swap(&self, artifact: &CompressedArtifact) -> Result<(), StorageError> {
        let mut fields = Map::new();
        fields.insert(FIELD_EXTERNAL_IMAGE_ID.to_string(), Value::Null);
        fields.insert(FIELD_SWAPPED_KEY.to_string(), Value::Null);
        self.records.update(COMPRESSED_COLLECTION, &artifact.id, fields).await
    }

    /// Whether `token` is the download token of the artifact stored at `path`.
    pub async fn authorizes(&self, path: &str, token: &str) -> Result<bool, StorageError> {
        let query = Query::new()
            .eq(FIELD_STORAGE_PATH, path)
            .eq(FIELD_DOWNLOAD_TOKEN, token)
            .limit(1);
        Ok(!self.records.query(COMPRESSED_COLLECTION, &query).await?.is_empty())
    }

    pub async fn record_count(&self) -> Result<usize, StorageError> {
        self.records.count(COMPRESSED_COLLECTION).await
    }

    async fn latest(&self, field: &str, value: &str) -> Result<Option<Record>, StorageError> {
        let query = Query::new().eq(field, value).newest_first().limit(1);
        Ok(self
            .records
            .query(COMPRESSED_COLLECTION, &query)
            .await?
            .into_iter()
            .next())
    }

    async fn verify(&self, record: Record) -> Result<Option<CacheLookup>, StorageError> {
        let mut artifact = CompressedArtifact::from_record(record)?;

        let (path, backfilled) = match artifact.storage_path.clone() {
            Some(path) => (path, false),
            None => match self.blobs.path_from_url(&artifact.url) {
                Some(path) => (path, true),
                None => {
                    warn!("cache record {} has no derivable blob path, evicting", artifact.id);
                    self.records.delete(COMPRESSED_COLLECTION, &artifact.id).await?;
                    return Ok(None);
                }
            },
        };

        if !self.blobs.exists(&path).await? {
            warn!(
                "stale cache record {} key={}: blob {} is gone, evicting",
                artifact.id, artifact.canonical_key, path
            );
            self.records.delete(COMPRESSED_COLLECTION, &artifact.id).await?;
            return Ok(None);
        }

        if backfilled {
            let mut fields = Map::new();
            fields.insert(FIELD_STORAGE_PATH.to_string(), json!(path));
            match self.records.update(COMPRESSED_COLLECTION, &artifact.id, fields).await {
                Ok(()) => debug!("back-filled storage path for record {}", artifact.id),
                Err(e) => warn!("storage path back-fill failed for record {}: {}", artifact.id, e),
            }
            artifact.storage_path = Some(path);
        }

        Ok(Some(CacheLookup {
            artifact,
            blob_verified: true,
            path_backfilled: backfilled,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryBlobStore, MemoryRecordStore};

    const BASE: &str = "memory://blobs";

    fn stores() -> (Arc<MemoryBlobStore>, Arc<MemoryRecordStore>, CacheStore) {
        let blobs = Arc::new(MemoryBlobStore::new(BASE));
        let records = Arc::new(MemoryRecordStore::new());
        let cache = CacheStore::new(blobs.clone(), records.clone());
        (blobs, records, cache)
    }

    fn meta() -> ArtifactMeta {
        ArtifactMeta {
            format: ImageFormat::WebP,
            original_byte_size: 200,
            strategy: Strategy::Local,
        }
    }

    #[tokio::test]
    async fn test_put_then_get_hits() {
        let (_, _, cache) = stores();
        let key = canonical("https://cdn.example.com/a.jpg?v=1");
        let stored = cache.put(&key, Bytes::from_static(b"0123456789"), meta()).await.unwrap();

        let hit = cache.get(&key, None).await.unwrap().unwrap();
        assert!(hit.blob_verified);
        assert_eq!(hit.artifact.url, stored.url);
        assert_eq!(hit.artifact.byte_size, 10);
        assert_eq!(hit.artifact.format, ImageFormat::WebP);
    }

    #[tokio::test]
    async fn test_resubmitted_artifact_url_hits() {
        let (_, _, cache) = stores();
        let key = canonical("https://cdn.example.com/b.png");
        let stored = cache.put(&key, Bytes::from_static(b"xx"), meta()).await.unwrap();

        let hit = cache.get(&canonical(&stored.url), None).await.unwrap().unwrap();
        assert_eq!(hit.artifact.id, stored.id);
    }

    #[tokio::test]
    async fn test_swapped_url_and_external_id_hit() {
        let (_, _, cache) = stores();
        let key = canonical("https://cdn.example.com/c.png");
        let stored = cache.put(&key, Bytes::from_static(b"xx"), meta()).await.unwrap();
        cache
            .record_swap(&stored, "img-42", Some("https://shop.example.com/live/c.png?v=9"))
            .await
            .unwrap();

        let by_live = cache
            .get(&canonical("https://shop.example.com/live/c.png"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_live.artifact.id, stored.id);

        let unrelated = canonical("https://elsewhere.example.com/z.png");
        let by_id = cache.get(&unrelated, Some("img-42")).await.unwrap().unwrap();
        assert_eq!(by_id.artifact.external_image_id.as_deref(), Some("img-42"));
    }

    #[tokio::test]
    async fn test_missing_blob_evicts_record() {
        let (blobs, _, cache) = stores();
        let key = canonical("https://cdn.example.com/d.jpg");
        let stored = cache.put(&key, Bytes::from_static(b"xx"), meta()).await.unwrap();
        assert_eq!(cache.record_count().await.unwrap(), 1);

        blobs.delete(stored.storage_path.as_deref().unwrap()).await.unwrap();

        assert!(cache.get(&key, None).await.unwrap().is_none());
        assert_eq!(cache.record_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_path_is_backfilled_from_url() {
        let (blobs, records, cache) = stores();
        let key = canonical("https://cdn.example.com/e.jpg");
        blobs.put("legacy/e.webp", Bytes::from_static(b"yy"), "image/webp").await.unwrap();

        let legacy_url = blobs.public_url("legacy/e.webp", "t0k");
        let fields = json!({
            "canonicalKey": key,
            "downloadToken": "t0k",
            "url": legacy_url,
            "byteSize": 2,
            "format": "webp",
            "originalByteSize": 9,
            "strategyUsed": "remote",
            "artifactKey": canonical(&legacy_url),
        });
        records
            .insert(COMPRESSED_COLLECTION, fields.as_object().cloned().unwrap())
            .await
            .unwrap();

        let first = cache.get(&key, None).await.unwrap().unwrap();
        assert!(first.path_backfilled);
        assert_eq!(first.artifact.storage_path.as_deref(), Some("legacy/e.webp"));

        let second = cache.get(&key, None).await.unwrap().unwrap();
        assert!(!second.path_backfilled);
    }

    #[tokio::test]
    async fn test_download_token_must_match_path() {
        let (_, _, cache) = stores();
        let key = canonical("https://cdn.example.com/g.jpg");
        let stored = cache.put(&key, Bytes::from_static(b"xx"), meta()).await.unwrap();
        let path = stored.storage_path.as_deref().unwrap();

        assert!(cache.authorizes(path, &stored.download_token).await.unwrap());
        assert!(!cache.authorizes(path, "guessed").await.unwrap());
        assert!(!cache.authorizes("compressed/other.webp", &stored.download_token).await.unwrap());
    }

    #[tokio::test]
    async fn test_latest_put_wins() {
        let (_, _, cache) = stores();
        let key = canonical("https://cdn.example.com/f.jpg");
        cache.put(&key, Bytes::from_static(b"first"), meta()).await.unwrap();
        let second = cache.put(&key, Bytes::from_static(b"second!"), meta()).await.unwrap();

        let hit = cache.get(&key, None).await.unwrap().unwrap();
        assert_eq!(hit.artifact.id, second.id);
    }
}
