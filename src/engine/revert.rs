// Revert: restore the archived original and point the origin back at it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::swap::{OriginSwapper, SwapReport};
use crate::canonical::canonical;
use crate::detect::format::ImageFormat;
use crate::error::RevertError;
use crate::origin::traits::OriginAuth;
use crate::store::archive::{OriginalArchive, OriginalEntry};
use crate::store::cache::CacheStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevertRequest {
    pub url: String,
    #[serde(default)]
    pub product_id: Option<String>,
    /// The currently-live (compressed) image at the origin.
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub origin: Option<OriginAuth>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoredResult {
    pub restored_url: String,
    pub restored_size: u64,
    pub format: ImageFormat,
    pub origin_swap: SwapReport,
}

pub struct RevertManager {
    archive: Arc<OriginalArchive>,
    cache: Arc<CacheStore>,
    swapper: Option<OriginSwapper>,
}

impl RevertManager {
    pub fn new(archive: Arc<OriginalArchive>, cache: Arc<CacheStore>) -> Self {
        Self {
            archive,
            cache,
            swapper: None,
        }
    }

    pub fn with_swapper(mut self, swapper: OriginSwapper) -> Self {
        self.swapper = Some(swapper);
        self
    }

    pub async fn revert(&self, req: &RevertRequest) -> Result<RestoredResult, RevertError> {
        let entry = self.resolve(req).await?;
        info!("reverting key={} to {}", entry.canonical_key, entry.url);

        let origin_swap = match req.product_id.as_deref().filter(|p| !p.is_empty()) {
            None => SwapReport::default(),
            Some(product_id) => match &self.swapper {
                None => SwapReport::skipped("no origin platform configured"),
                Some(swapper) => {
                    let report = swapper
                        .swap(req.origin.as_ref(), product_id, &entry.url, req.image_id.as_deref())
                        .await;
                    if report.new_image_id.is_some() {
                        self.clear_swap_markers(&entry).await;
                    }
                    report
                }
            },
        };

        Ok(RestoredResult {
            restored_url: entry.url,
            restored_size: entry.byte_size,
            format: entry.format,
            origin_swap,
        })
    }

    /// Archive entry by canonical key, else by whatever cached artifact the URL refers to.
    async fn resolve(&self, req: &RevertRequest) -> Result<OriginalEntry, RevertError> {
        let key = canonical(&req.url);
        let mut entry = self.archive.find(&key).await?;

        if entry.is_none() {
            if let Some(hit) = self.cache.get(&key, req.image_id.as_deref()).await? {
                debug!("revert resolved {} via cached artifact {}", key, hit.artifact.canonical_key);
                entry = self.archive.find(&hit.artifact.canonical_key).await?;
            }
        }

        let entry = entry.ok_or_else(|| RevertError::NotFound(key.to_string()))?;
        if !self.archive.blob_exists(&entry).await? {
            warn!("archived original for {} has no blob", entry.canonical_key);
            return Err(RevertError::NotFound(key.to_string()));
        }
        Ok(entry)
    }

    async fn clear_swap_markers(&self, entry: &OriginalEntry) {
        match self.cache.find(&entry.canonical_key).await {
            Ok(Some(hit)) => {
                if let Err(e) = self.cache.clear_swap(&hit.artifact).await {
                    warn!("clearing swap markers for {} failed: {}", entry.canonical_key, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("swap marker lookup for {} failed: {}", entry.canonical_key, e),
        }
    }
}
