use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use ma_image_engine::api::service::{ImageService, Persistence};
use ma_image_engine::api::telemetry::init_tracing;
use ma_image_engine::config::{EngineConfig, RemoteEngineConfig, DEFAULT_REMOTE_ENDPOINT};
use ma_image_engine::server::handler::ImageServer;
use ma_image_engine::store::fs_blob::FsBlobStore;
use ma_image_engine::store::json_file::JsonFileRecordStore;
use ma_image_engine::store::memory::MemoryRecordStore;
use ma_image_engine::store::traits::RecordStore;

const CONFIG_ENV: &str = "MA_IMAGE_ENGINE_CONFIG";
const REMOTE_KEY_ENV: &str = "MA_IMAGE_ENGINE_REMOTE_KEY";

fn load_config() -> Result<EngineConfig> {
    let mut config = match std::env::var(CONFIG_ENV) {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?
        }
        Err(_) => EngineConfig::default(),
    };
    if let Ok(key) = std::env::var(REMOTE_KEY_ENV) {
        if !key.trim().is_empty() {
            let endpoint = config
                .remote
                .as_ref()
                .map(|r| r.endpoint.clone())
                .unwrap_or_else(|| DEFAULT_REMOTE_ENDPOINT.to_string());
            config.remote = Some(RemoteEngineConfig { api_key: key, endpoint });
        }
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = load_config()?;

    let records: Arc<dyn RecordStore> = match &config.storage.records_path {
        Some(path) => Arc::new(JsonFileRecordStore::open(path).await?),
        None => Arc::new(MemoryRecordStore::new()),
    };

    // One persistence client for the life of the process.
    let persistence = Persistence {
        blobs: Arc::new(FsBlobStore::new(
            &config.storage.blob_root,
            config.server.public_base_url.clone(),
        )),
        records,
    };

    let service = Arc::new(ImageService::from_config(&config, persistence)?);
    let server = ImageServer::start(Arc::clone(&service), &config.server.bind_addr).await?;
    info!("serving on {}", config.server.bind_addr);

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    service.shutdown();
    server.shutdown();
    Ok(())
}
