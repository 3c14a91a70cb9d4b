use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::info;

use crate::codec::local::LocalEngine;
use crate::codec::remote::RemoteEngine;
use crate::codec::{CompressionEngine, EngineSet};
use crate::config::EngineConfig;
use crate::engine::orchestrator::{BatchEvent, BatchReport, BatchRequest, Orchestrator};
use crate::engine::revert::{RestoredResult, RevertManager, RevertRequest};
use crate::engine::swap::OriginSwapper;
use crate::error::{BatchError, RevertError, StorageError};
use crate::origin::http_origin::HttpOriginClient;
use crate::origin::traits::OriginPlatform;
use crate::source::http_source::HttpSource;
use crate::source::traits::ImageSource;
use crate::store::archive::OriginalArchive;
use crate::store::cache::CacheStore;
use crate::store::traits::{BlobStore, RecordStore};

/// The persistence client, created once at start-up and shared by every component.
#[derive(Clone)]
pub struct Persistence {
    pub blobs: Arc<dyn BlobStore>,
    pub records: Arc<dyn RecordStore>,
}

/// The two external operations: batch compress and revert.
pub struct ImageService {
    orchestrator: Arc<Orchestrator>,
    reverter: RevertManager,
    cache: Arc<CacheStore>,
    archive: Arc<OriginalArchive>,
    blobs: Arc<dyn BlobStore>,
}

impl ImageService {
    /// Wire HTTP fetcher, engines and origin client from configuration.
    pub fn from_config(config: &EngineConfig, persistence: Persistence) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch.timeout_secs))
            .user_agent(config.fetch.user_agent.as_str())
            .build()
            .context("building http client")?;

        let local: Arc<dyn CompressionEngine> = Arc::new(LocalEngine::new(config.local.clone()));
        let remote = config.remote.as_ref().map(|remote| {
            Arc::new(RemoteEngine::new(client.clone(), remote)) as Arc<dyn CompressionEngine>
        });
        info!(
            "engines ready local=on remote={}",
            if remote.is_some() { "on" } else { "off" }
        );

        let origin: Arc<dyn OriginPlatform> =
            Arc::new(HttpOriginClient::new(client.clone(), config.origin.clone()));

        Ok(Self::from_parts(
            Arc::new(HttpSource::with_client(client)),
            EngineSet::new(local, remote),
            Some(origin),
            persistence,
            config,
        ))
    }

    /// Wire from explicit collaborators.
    pub fn from_parts(
        source: Arc<dyn ImageSource>,
        engines: EngineSet,
        origin: Option<Arc<dyn OriginPlatform>>,
        persistence: Persistence,
        config: &EngineConfig,
    ) -> Self {
        let cache = Arc::new(CacheStore::new(
            Arc::clone(&persistence.blobs),
            Arc::clone(&persistence.records),
        ));
        let archive = Arc::new(OriginalArchive::new(
            Arc::clone(&persistence.blobs),
            Arc::clone(&persistence.records),
        ));

        let mut orchestrator = Orchestrator::new(source, engines, Arc::clone(&cache), Arc::clone(&archive))
            .with_key_claims(config.per_key_claims)
            .with_default_strategy(config.default_strategy);
        let mut reverter = RevertManager::new(Arc::clone(&archive), Arc::clone(&cache));
        if let Some(platform) = origin {
            let swapper = OriginSwapper::new(platform);
            orchestrator = orchestrator.with_swapper(swapper.clone());
            reverter = reverter.with_swapper(swapper);
        }

        Self {
            orchestrator: Arc::new(orchestrator),
            reverter,
            cache,
            archive,
            blobs: persistence.blobs,
        }
    }

    pub async fn compress(&self, req: &BatchRequest) -> Result<BatchReport, BatchError> {
        self.orchestrator.process_batch(req).await
    }

    pub fn compress_stream(&self, req: BatchRequest) -> Result<mpsc::Receiver<BatchEvent>, BatchError> {
        self.orchestrator.stream_batch(req)
    }

    pub async fn revert(&self, req: &RevertRequest) -> Result<RestoredResult, RevertError> {
        self.reverter.revert(req).await
    }

    /// Whether `token` is the download token recorded for the artifact or original at `path`.
    pub async fn blob_authorized(&self, path: &str, token: &str) -> Result<bool, StorageError> {
        if token.is_empty() {
            return Ok(false);
        }
        if self.cache.authorizes(path, token).await? {
            return Ok(true);
        }
        self.archive.authorizes(path, token).await
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Stop starting new batch items.
    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
    }
}
