// Shared fixtures: generated images, a fake upstream, a recording origin platform.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use parking_lot::Mutex;
use tokio::net::TcpListener;

use ma_image_engine::api::service::{ImageService, Persistence};
use ma_image_engine::codec::local::LocalEngine;
use ma_image_engine::codec::{CompressionEngine, EngineSet};
use ma_image_engine::config::EngineConfig;
use ma_image_engine::error::OriginError;
use ma_image_engine::origin::traits::{CreatedImage, OriginAuth, OriginPlatform};
use ma_image_engine::source::http_source::HttpSource;
use ma_image_engine::store::memory::{MemoryBlobStore, MemoryRecordStore};

pub const BLOB_BASE: &str = "http://blobs.test/blobs";

/// Smooth 512x512 gradient, PNG-encoded.
pub fn gradient_png() -> Vec<u8> {
    let img = RgbImage::from_fn(512, 512, |x, y| Rgb([(x / 2) as u8, (y / 2) as u8, ((x + y) / 4) as u8]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// High-entropy image saved at very low JPEG quality.
pub fn noisy_low_quality_jpeg() -> Vec<u8> {
    let img = RgbImage::from_fn(128, 128, |x, y| {
        let v = (x.wrapping_mul(7919) ^ y.wrapping_mul(104_729) ^ x.wrapping_mul(y)) as u8;
        Rgb([v, v.wrapping_mul(3), v.wrapping_add(91)])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, 10))
        .unwrap();
    buf
}

#[derive(Clone, Default)]
pub struct Upstream {
    files: Arc<Mutex<HashMap<String, (Vec<u8>, &'static str)>>>,
    hits: Arc<AtomicUsize>,
}

impl Upstream {
    pub fn add(&self, name: &str, bytes: Vec<u8>, content_type: &'static str) {
        self.files.lock().insert(name.to_string(), (bytes, content_type));
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn serve_image(State(upstream): State<Upstream>, Path(name): Path<String>) -> Response {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    match upstream.files.lock().get(&name) {
        Some((bytes, content_type)) => {
            ([(header::CONTENT_TYPE, *content_type)], bytes.clone()).into_response()
        }
        None => (StatusCode::NOT_FOUND, "missing").into_response(),
    }
}

/// Fake image host serving `/img/{name}`.
pub async fn start_upstream(upstream: Upstream) -> SocketAddr {
    let app = Router::new()
        .route("/img/{name}", get(serve_image))
        .with_state(upstream);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Origin platform double that records every call in order.
#[derive(Default)]
pub struct RecordingOrigin {
    pub calls: Mutex<Vec<String>>,
    pub created: AtomicUsize,
    pub fail_delete: bool,
}

impl RecordingOrigin {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl OriginPlatform for RecordingOrigin {
    async fn create_image(&self, _auth: &OriginAuth, product_id: &str, src: &str) -> Result<CreatedImage, OriginError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().push(format!("create {product_id} {src}"));
        Ok(CreatedImage {
            id: format!("img-{n}"),
            src: Some(format!("https://cdn.shop.test/products/{n}.img?v=1")),
        })
    }

    async fn delete_image(&self, _auth: &OriginAuth, product_id: &str, image_id: &str) -> Result<(), OriginError> {
        self.calls.lock().push(format!("delete {product_id} {image_id}"));
        if self.fail_delete {
            return Err(OriginError::new(Some(404), "image not found"));
        }
        Ok(())
    }
}

pub fn auth() -> OriginAuth {
    OriginAuth {
        shop: "demo.myshopify.com".to_string(),
        access_token: "shpat_test".to_string(),
    }
}

pub struct Harness {
    pub service: Arc<ImageService>,
    pub persistence: Persistence,
    pub blobs: Arc<MemoryBlobStore>,
}

/// Service over in-memory stores, the local engine only, and an optional origin double.
pub fn harness(origin: Option<Arc<dyn OriginPlatform>>) -> Harness {
    harness_with(EngineConfig::default(), origin)
}

pub fn harness_with(config: EngineConfig, origin: Option<Arc<dyn OriginPlatform>>) -> Harness {
    let blobs = Arc::new(MemoryBlobStore::new(BLOB_BASE));
    let persistence = Persistence {
        blobs: blobs.clone(),
        records: Arc::new(MemoryRecordStore::new()),
    };
    let local: Arc<dyn CompressionEngine> = Arc::new(LocalEngine::new(config.local.clone()));
    let service = ImageService::from_parts(
        Arc::new(HttpSource::with_client(reqwest::Client::new())),
        EngineSet::new(local, None),
        origin,
        persistence.clone(),
        &config,
    );
    Harness {
        service: Arc::new(service),
        persistence,
        blobs,
    }
}
