// Batch orchestrator: drives each URL through cache check, fetch, compress, store and swap.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::claims::KeyClaims;
use super::stats::{BatchStats, BatchTotals};
use super::swap::{OriginSwapper, SwapReport};
use crate::canonical::{canonical, CanonicalKey};
use crate::codec::{savings_fraction, CompressionEngine, EncodeInput, EncodeOptions, EngineSet, Strategy};
use crate::detect::format::ImageFormat;
use crate::error::BatchError;
use crate::origin::traits::OriginAuth;
use crate::source::traits::{Fetched, ImageSource};
use crate::store::archive::OriginalArchive;
use crate::store::cache::{ArtifactMeta, CacheLookup, CacheStore, CompressedArtifact};

/// One batch-compress request from the presentation layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub options: EncodeOptions,
    /// Aligned by index with `urls`.
    #[serde(default)]
    pub product_ids: Option<Vec<Option<String>>>,
    /// Aligned by index with `urls`. The image currently live at the origin.
    #[serde(default)]
    pub image_ids: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub origin: Option<OriginAuth>,
}

impl BatchRequest {
    fn product_id(&self, index: usize) -> Option<&str> {
        aligned(self.product_ids.as_deref(), index)
    }

    fn image_id(&self, index: usize) -> Option<&str> {
        aligned(self.image_ids.as_deref(), index)
    }
}

fn aligned(list: Option<&[Option<String>]>, index: usize) -> Option<&str> {
    list.and_then(|l| l.get(index))
        .and_then(|v| v.as_deref())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    Pending,
    CacheCheck,
    Fetch,
    Compress,
    Store,
    OriginSwap,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    Fetch,
    Encode,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    /// Stage the item was in when it failed.
    pub stage: ItemStage,
    pub kind: ItemErrorKind,
    pub message: String,
    /// Full error chain; debug builds only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ItemError {
    fn new<E: std::error::Error>(stage: ItemStage, kind: ItemErrorKind, err: &E) -> Self {
        Self {
            stage,
            kind,
            message: err.to_string(),
            detail: cfg!(debug_assertions).then(|| format!("{err:?}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub url: String,
    pub success: bool,
    pub original_size: u64,
    pub compressed_size: u64,
    pub format: Option<ImageFormat>,
    pub savings_fraction: f64,
    pub compressed_url: Option<String>,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_swap: Option<SwapReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl BatchItemResult {
    fn from_artifact(url: &str, artifact: &CompressedArtifact, from_cache: bool) -> Self {
        Self {
            url: url.to_string(),
            success: true,
            original_size: artifact.original_byte_size,
            compressed_size: artifact.byte_size,
            format: Some(artifact.format),
            savings_fraction: savings_fraction(artifact.original_byte_size, artifact.byte_size),
            compressed_url: Some(artifact.url.clone()),
            from_cache,
            origin_swap: None,
            error: None,
        }
    }

    fn failed(url: &str, error: ItemError) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            error: Some(error),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<BatchItemResult>,
    pub totals: BatchTotals,
}

/// Progressive output of a streamed batch: one `Item` per URL in order, then `Summary`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Item {
        index: usize,
        #[serde(flatten)]
        result: BatchItemResult,
    },
    Summary(BatchTotals),
}

pub struct Orchestrator {
    source: Arc<dyn ImageSource>,
    engines: EngineSet,
    cache: Arc<CacheStore>,
    archive: Arc<OriginalArchive>,
    swapper: Option<OriginSwapper>,
    claims: KeyClaims,
    default_strategy: Strategy,
    shutdown_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn ImageSource>,
        engines: EngineSet,
        cache: Arc<CacheStore>,
        archive: Arc<OriginalArchive>,
    ) -> Self {
        Self {
            source,
            engines,
            cache,
            archive,
            swapper: None,
            claims: KeyClaims::new(false),
            default_strategy: Strategy::Local,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Enable the post-store origin swap hook.
    pub fn with_swapper(mut self, swapper: OriginSwapper) -> Self {
        self.swapper = Some(swapper);
        self
    }

    pub fn with_key_claims(mut self, enabled: bool) -> Self {
        self.claims = KeyClaims::new(enabled);
        self
    }

    pub fn with_default_strategy(mut self, strategy: Strategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Stop starting new items. Items already in flight run to completion.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Whole-batch preconditions, checked once before any item runs.
    pub fn prepare(&self, req: &BatchRequest) -> Result<Arc<dyn CompressionEngine>, BatchError> {
        if req.urls.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        for (field, list) in [("productIds", &req.product_ids), ("imageIds", &req.image_ids)] {
            if let Some(list) = list {
                if list.len() != req.urls.len() {
                    return Err(BatchError::MisalignedOrigins {
                        field,
                        expected: req.urls.len(),
                        got: list.len(),
                    });
                }
            }
        }
        self.engines.select(req.strategy.unwrap_or(self.default_strategy))
    }

    /// Run a batch to completion and return every result plus the aggregates.
    pub async fn process_batch(&self, req: &BatchRequest) -> Result<BatchReport, BatchError> {
        let engine = self.prepare(req)?;
        Ok(self.drive(engine.as_ref(), req, None).await)
    }

    /// Run a batch in the background, emitting each result as soon as it is ready.
    ///
    /// Each item starts only once the previous result has been taken off the channel.
    /// Dropping the receiver stops the batch before its next item.
    pub fn stream_batch(self: &Arc<Self>, req: BatchRequest) -> Result<mpsc::Receiver<BatchEvent>, BatchError> {
        let engine = self.prepare(&req)?;
        let (tx, rx) = mpsc::channel::<BatchEvent>(1);
        let orchestrator = Arc::clone(self);

        tokio::spawn(async move {
            let report = orchestrator.drive(engine.as_ref(), &req, Some(&tx)).await;
            let _ = tx.send(BatchEvent::Summary(report.totals)).await;
        });

        Ok(rx)
    }

    async fn drive(
        &self,
        engine: &dyn CompressionEngine,
        req: &BatchRequest,
        tx: Option<&mpsc::Sender<BatchEvent>>,
    ) -> BatchReport {
        let t0 = Instant::now();
        let mut stats = BatchStats::new();
        let mut results = Vec::with_capacity(req.urls.len());

        info!(
            "batch start items={} strategy={}",
            req.urls.len(),
            engine.strategy().as_str()
        );

        for (index, url) in req.urls.iter().enumerate() {
            if self.shutdown_token.is_cancelled() {
                warn!("batch stopped by shutdown before item {}", index);
                break;
            }

            // Reserve the slot first so nothing runs ahead of the consumer.
            let permit = match tx {
                Some(tx) => match tx.reserve().await {
                    Ok(permit) if !tx.is_closed() => Some(permit),
                    _ => {
                        debug!("batch receiver dropped before item {}", index);
                        break;
                    }
                },
                None => None,
            };

            let result = self.process_item(engine, req, index, url).await;
            stats.record(&result);

            if let Some(permit) = permit {
                permit.send(BatchEvent::Item {
                    index,
                    result: result.clone(),
                });
            }
            results.push(result);
        }

        let totals = stats.snapshot();
        info!(
            "batch done processed={} ok={} errors={} savings={}% elapsed_ms={}",
            totals.total_processed,
            totals.total_successful,
            totals.total_errors,
            totals.total_savings,
            t0.elapsed().as_millis()
        );
        BatchReport { results, totals }
    }

    async fn process_item(
        &self,
        engine: &dyn CompressionEngine,
        req: &BatchRequest,
        index: usize,
        url: &str,
    ) -> BatchItemResult {
        let key = canonical(url);
        debug!("item {} {:?} url={}", index, ItemStage::Pending, url);

        let _claim = self.claims.acquire(&key).await;
        match self.run_item(engine, req, index, url, &key).await {
            Ok(result) => {
                debug!("item {} {:?} from_cache={}", index, ItemStage::Done, result.from_cache);
                result
            }
            Err(error) => {
                warn!(
                    "item {} {:?} at {:?}: {}",
                    index,
                    ItemStage::Failed,
                    error.stage,
                    error.message
                );
                BatchItemResult::failed(url, error)
            }
        }
    }

    async fn run_item(
        &self,
        engine: &dyn CompressionEngine,
        req: &BatchRequest,
        index: usize,
        url: &str,
        key: &CanonicalKey,
    ) -> Result<BatchItemResult, ItemError> {
        let image_id = req.image_id(index);

        debug!("item {} {:?} key={}", index, ItemStage::CacheCheck, key);
        let lookup: Option<CacheLookup> = self
            .cache
            .get(key, image_id)
            .await
            .map_err(|e| ItemError::new(ItemStage::CacheCheck, ItemErrorKind::Storage, &e))?;
        if let Some(hit) = lookup {
            info!("cache hit key={} url={}", key, hit.artifact.url);
            return Ok(BatchItemResult::from_artifact(url, &hit.artifact, true));
        }

        debug!("item {} {:?}", index, ItemStage::Fetch);
        let fetched = self
            .source
            .fetch(url)
            .await
            .map_err(|e| ItemError::new(ItemStage::Fetch, ItemErrorKind::Fetch, &e))?;

        debug!("item {} {:?} bytes={}", index, ItemStage::Compress, fetched.bytes.len());
        let input = EncodeInput {
            bytes: &fetched.bytes,
            content_type: fetched.content_type.as_deref(),
            source_url: Some(url),
        };
        let encoded = engine
            .encode(input, req.options)
            .await
            .map_err(|e| ItemError::new(ItemStage::Compress, ItemErrorKind::Encode, &e))?;

        debug!("item {} {:?} bytes={}", index, ItemStage::Store, encoded.compressed_size);
        let meta = ArtifactMeta {
            format: encoded.format,
            original_byte_size: encoded.original_size,
            strategy: engine.strategy(),
        };
        let artifact = self
            .cache
            .put(key, encoded.buffer.clone(), meta)
            .await
            .map_err(|e| ItemError::new(ItemStage::Store, ItemErrorKind::Storage, &e))?;

        // Write-once: the first fresh store of a key keeps its pristine bytes for revert.
        let archived = self.archive_original(key, &fetched, encoded.format).await;

        let mut result = BatchItemResult::from_artifact(url, &artifact, false);
        if let Some(product_id) = req.product_id(index) {
            debug!("item {} {:?} product={}", index, ItemStage::OriginSwap, product_id);
            result.origin_swap = Some(match archived {
                Ok(()) => self.swap_in(req, key, &artifact, product_id, image_id).await,
                Err(reason) => SwapReport::skipped(reason),
            });
        }
        Ok(result)
    }

    /// A failure is logged and returned as the reason any swap is skipped; the item stays stored.
    async fn archive_original(
        &self,
        key: &CanonicalKey,
        original: &Fetched,
        fallback_format: ImageFormat,
    ) -> Result<(), String> {
        let format = ImageFormat::sniff(&original.bytes)
            .or_else(|| ImageFormat::infer(original.content_type.as_deref(), Some(key.as_str())))
            .unwrap_or(fallback_format);
        match self.archive.ensure(key, original.bytes.clone(), format).await {
            Ok(entry) => {
                debug!("original for key={} archived at {}", key, entry.stored_path);
                Ok(())
            }
            Err(e) => {
                warn!("original archive failed key={}: {}", key, e);
                Err(format!("original not archived: {e}"))
            }
        }
    }

    async fn swap_in(
        &self,
        req: &BatchRequest,
        key: &CanonicalKey,
        artifact: &CompressedArtifact,
        product_id: &str,
        old_image_id: Option<&str>,
    ) -> SwapReport {
        let Some(swapper) = &self.swapper else {
            return SwapReport::skipped("no origin platform configured");
        };
        let auth = req.origin.as_ref().filter(|a| a.is_usable());
        if auth.is_none() {
            return SwapReport::skipped("missing origin access token");
        }

        let report = swapper.swap(auth, product_id, &artifact.url, old_image_id).await;
        if let Some(new_id) = report.new_image_id.as_deref() {
            if let Err(e) = self
                .cache
                .record_swap(artifact, new_id, report.new_image_src.as_deref())
                .await
            {
                warn!("recording swap for key={} failed: {}", key, e);
            }
        }
        report
    }
}
