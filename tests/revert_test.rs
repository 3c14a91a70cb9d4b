mod support;

use std::sync::Arc;

use ma_image_engine::canonical::canonical;
use ma_image_engine::codec::EncodeOptions;
use ma_image_engine::detect::format::ImageFormat;
use ma_image_engine::engine::orchestrator::BatchRequest;
use ma_image_engine::engine::revert::RevertRequest;
use ma_image_engine::error::RevertError;
use ma_image_engine::origin::traits::OriginPlatform;
use ma_image_engine::store::cache::CacheStore;
use ma_image_engine::store::traits::BlobStore;

use support::{auth, gradient_png, harness, start_upstream, RecordingOrigin, Upstream};

fn swap_request(url: &str) -> BatchRequest {
    BatchRequest {
        urls: vec![url.to_string()],
        options: EncodeOptions {
            quality: None,
            max_width: Some(96),
            max_height: Some(96),
        },
        product_ids: Some(vec![Some("p1".to_string())]),
        image_ids: Some(vec![Some("orig-img".to_string())]),
        origin: Some(auth()),
        ..BatchRequest::default()
    }
}

#[tokio::test]
async fn test_revert_restores_archived_original() {
    let upstream = Upstream::default();
    let png = gradient_png();
    upstream.add("a.png", png.clone(), "image/png");
    let addr = start_upstream(upstream).await;
    let origin = Arc::new(RecordingOrigin::default());
    let h = harness(Some(origin.clone() as Arc<dyn OriginPlatform>));

    let url = format!("http://{}/img/a.png", addr);
    let report = h.service.compress(&swap_request(&url)).await.unwrap();
    let item = &report.results[0];
    let new_id = item.origin_swap.as_ref().unwrap().new_image_id.clone().unwrap();

    let restored = h
        .service
        .revert(&RevertRequest {
            url: url.clone(),
            product_id: Some("p1".to_string()),
            image_id: Some(new_id.clone()),
            origin: Some(auth()),
        })
        .await
        .unwrap();

    assert_eq!(restored.restored_size, item.original_size);
    assert_eq!(restored.restored_size, png.len() as u64);
    assert_eq!(restored.format, ImageFormat::Png);
    assert!(restored.origin_swap.succeeded);

    let path = h.blobs.path_from_url(&restored.restored_url).unwrap();
    assert_eq!(h.blobs.get(&path).await.unwrap().unwrap().as_ref(), png.as_slice());

    // Swap in, then swap back: create before delete both times.
    assert_eq!(
        origin.calls(),
        vec![
            format!("create p1 {}", item.compressed_url.as_deref().unwrap()),
            "delete p1 orig-img".to_string(),
            format!("create p1 {}", restored.restored_url),
            format!("delete p1 {new_id}"),
        ]
    );

    let cache = CacheStore::new(h.persistence.blobs.clone(), h.persistence.records.clone());
    let artifact = cache.find(&canonical(&url)).await.unwrap().unwrap().artifact;
    assert!(artifact.external_image_id.is_none());
    assert!(artifact.swapped_key.is_none());
}

#[tokio::test]
async fn test_revert_after_plain_compress() {
    let upstream = Upstream::default();
    let png = gradient_png();
    upstream.add("a.png", png.clone(), "image/png");
    let addr = start_upstream(upstream).await;
    let h = harness(None);

    let url = format!("http://{}/img/a.png", addr);
    let report = h
        .service
        .compress(&BatchRequest {
            urls: vec![url.clone()],
            ..BatchRequest::default()
        })
        .await
        .unwrap();
    let item = &report.results[0];
    assert!(item.success);
    assert!(item.origin_swap.is_none());

    let restored = h
        .service
        .revert(&RevertRequest {
            url: format!("{}?v=7", url),
            ..RevertRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(restored.restored_size, item.original_size);
    assert_eq!(restored.format, ImageFormat::Png);
    assert!(!restored.origin_swap.attempted);

    let path = h.blobs.path_from_url(&restored.restored_url).unwrap();
    assert!(path.starts_with("originals/"));
    assert_eq!(h.blobs.get(&path).await.unwrap().unwrap().as_ref(), png.as_slice());
}

#[tokio::test]
async fn test_revert_by_compressed_url() {
    let upstream = Upstream::default();
    let png = gradient_png();
    upstream.add("a.png", png.clone(), "image/png");
    let addr = start_upstream(upstream).await;
    let origin = Arc::new(RecordingOrigin::default());
    let h = harness(Some(origin.clone() as Arc<dyn OriginPlatform>));

    let url = format!("http://{}/img/a.png", addr);
    let report = h.service.compress(&swap_request(&url)).await.unwrap();
    let compressed_url = report.results[0].compressed_url.clone().unwrap();

    let restored = h
        .service
        .revert(&RevertRequest {
            url: compressed_url,
            ..RevertRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(restored.restored_size, png.len() as u64);
    assert!(!restored.origin_swap.attempted);
    assert_eq!(origin.calls().len(), 2);
}

#[tokio::test]
async fn test_revert_unknown_url_is_not_found() {
    let h = harness(None);
    let err = h
        .service
        .revert(&RevertRequest {
            url: "https://cdn.shop.test/never-seen.jpg".to_string(),
            ..RevertRequest::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RevertError::NotFound(_)));
}

#[tokio::test]
async fn test_revert_with_missing_archive_blob_is_not_found() {
    let upstream = Upstream::default();
    upstream.add("a.png", gradient_png(), "image/png");
    let addr = start_upstream(upstream).await;
    let origin = Arc::new(RecordingOrigin::default());
    let h = harness(Some(origin as Arc<dyn OriginPlatform>));

    let url = format!("http://{}/img/a.png", addr);
    h.service.compress(&swap_request(&url)).await.unwrap();

    let originals: Vec<String> = h
        .blobs
        .paths()
        .into_iter()
        .filter(|p| p.starts_with("originals/"))
        .collect();
    assert_eq!(originals.len(), 1);
    h.blobs.delete(&originals[0]).await.unwrap();

    let err = h
        .service
        .revert(&RevertRequest {
            url,
            ..RevertRequest::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RevertError::NotFound(_)));
}
