// Filesystem blob store rooted at a directory; URLs point at the server's /blobs route.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::debug;

use super::traits::{blob_path_from_url, blob_url, BlobStore};
use crate::error::StorageError;

pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    /// Join `path` under the root, refusing absolute paths and `..`.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path);
        let safe = !path.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::BlobRead {
                path: path.to_string(),
                message: "path escapes blob root".to_string(),
            });
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: Bytes, _content_type: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        let write_err = |e: std::io::Error| StorageError::BlobWrite {
            path: path.to_string(),
            message: e.to_string(),
        };
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        fs::write(&full, &bytes).await.map_err(write_err)?;
        debug!("blob written path={} bytes={}", path, bytes.len());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>, StorageError> {
        let full = self.resolve(path)?;
        match fs::read(&full).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::BlobRead {
                path: path.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.resolve(path)?;
        fs::try_exists(&full).await.map_err(|e| StorageError::BlobRead {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::BlobWrite {
                path: path.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn public_url(&self, path: &str, token: &str) -> String {
        blob_url(&self.base_url, path, token)
    }

    fn path_from_url(&self, url: &str) -> Option<String> {
        blob_path_from_url(&self.base_url, url)
    }
}
