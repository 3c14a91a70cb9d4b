// Axum request handlers: expose batch compress, revert and stored blobs over HTTP.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::api::service::ImageService;
use crate::detect::format::ImageFormat;
use crate::engine::orchestrator::{BatchEvent, BatchRequest};
use crate::engine::revert::RevertRequest;
use crate::error::RevertError;

pub struct ImageServer {
    port: u16,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ImageServer {
    /// Bind `addr` (use port 0 for a random port) and serve in the background.
    pub async fn start(service: Arc<ImageService>, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let app = router(service);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!("image server listening on port {}", port);
        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// Shutdown the server gracefully.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub fn router(service: Arc<ImageService>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/compress", post(compress_handler))
        .route("/revert", post(revert_handler))
        .route("/blobs/{*path}", get(blob_handler))
        .with_state(service)
}

/// POST /compress: NDJSON, one line per item in submission order, then a summary line.
async fn compress_handler(
    State(service): State<Arc<ImageService>>,
    Json(req): Json<BatchRequest>,
) -> Response {
    let rx = match service.compress_stream(req) {
        Ok(rx) => rx,
        Err(e) => {
            debug!("batch rejected: {}", e);
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response();
        }
    };

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((encode_line(&event), rx))
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

fn encode_line(event: &BatchEvent) -> Result<Bytes, std::io::Error> {
    let mut line = serde_json::to_vec(event).map_err(std::io::Error::other)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

/// POST /revert
async fn revert_handler(
    State(service): State<Arc<ImageService>>,
    Json(req): Json<RevertRequest>,
) -> Response {
    match service.revert(&req).await {
        Ok(restored) => Json(restored).into_response(),
        Err(RevertError::NotFound(key)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no archived original for {key}") })),
        )
            .into_response(),
        Err(e) => {
            error!("revert error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct BlobParams {
    #[serde(default)]
    token: String,
}

/// GET /blobs/{*path}?token=: raw stored bytes, only with the token recorded for that path.
async fn blob_handler(
    State(service): State<Arc<ImageService>>,
    Path(path): Path<String>,
    Query(params): Query<BlobParams>,
) -> Response {
    match service.blob_authorized(&path, &params.token).await {
        Ok(true) => {}
        Ok(false) => {
            debug!("blob download refused path={}", path);
            return (StatusCode::FORBIDDEN, "invalid download token").into_response();
        }
        Err(e) => {
            error!("blob token check error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("error: {}", e)).into_response();
        }
    }

    match service.blobs().get(&path).await {
        Ok(Some(bytes)) => {
            let content_type = ImageFormat::from_url(&path)
                .map(ImageFormat::mime)
                .unwrap_or("application/octet-stream");
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, "blob not found").into_response(),
        Err(e) => {
            error!("blob read error: {}", e);
            (StatusCode::BAD_REQUEST, format!("error: {}", e)).into_response()
        }
    }
}
