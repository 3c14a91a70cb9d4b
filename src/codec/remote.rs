// Remote quality-optimising service (TinyPNG-compatible shrink + convert API).

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{no_worse_than_original, CompressionEngine, EncodeInput, EncodeOptions, EncodeResult, Strategy};
use crate::config::RemoteEngineConfig;
use crate::detect::format::ImageFormat;
use crate::error::{EncodeError, EncodeErrorKind};

/// Targets the service can convert to.
const CONVERTIBLE: [ImageFormat; 4] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP, ImageFormat::Avif];

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

pub struct RemoteEngine {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl RemoteEngine {
    pub fn new(client: Client, config: &RemoteEngineConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    async fn shrink(&self, input: &EncodeInput<'_>) -> Result<String, EncodeError> {
        let resp = self
            .client
            .post(format!("{}/shrink", self.endpoint))
            .basic_auth("api", Some(&self.api_key))
            .body(input.bytes.clone())
            .send()
            .await
            .map_err(|e| EncodeError::new(EncodeErrorKind::Conversion, format!("shrink request: {e}")))?;

        let resp = check_status(resp, "shrink").await?;
        if let Some(count) = resp.headers().get("compression-count").and_then(|v| v.to_str().ok()) {
            info!("remote engine compression count={}", count);
        }

        resp.headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| EncodeError::new(EncodeErrorKind::Conversion, "shrink response had no Location"))
    }

    async fn download_converted(&self, output_url: &str, target: ImageFormat) -> Result<Vec<u8>, EncodeError> {
        let resp = self
            .client
            .post(output_url)
            .basic_auth("api", Some(&self.api_key))
            .json(&json!({ "convert": { "type": target.mime() } }))
            .send()
            .await
            .map_err(|e| EncodeError::new(EncodeErrorKind::Fetch, format!("download optimised: {e}")))?;

        let resp = check_status(resp, "convert").await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| EncodeError::new(EncodeErrorKind::Fetch, format!("read optimised body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl CompressionEngine for RemoteEngine {
    fn strategy(&self) -> Strategy {
        Strategy::Remote
    }

    async fn encode(&self, input: EncodeInput<'_>, _options: EncodeOptions) -> Result<EncodeResult, EncodeError> {
        let target = ImageFormat::infer(input.content_type, input.source_url)
            .or_else(|| ImageFormat::sniff(input.bytes))
            .ok_or_else(|| EncodeError::new(EncodeErrorKind::Conversion, "cannot infer target format"))?;
        if !CONVERTIBLE.contains(&target) {
            return Err(EncodeError::new(
                EncodeErrorKind::Conversion,
                format!("service cannot convert to {}", target.mime()),
            ));
        }

        let output_url = self.shrink(&input).await?;
        debug!("remote engine shrink ok, converting to {}", target.mime());
        let optimised = self.download_converted(&output_url, target).await?;

        let original_format = ImageFormat::sniff(input.bytes).unwrap_or(target);
        Ok(no_worse_than_original(input.bytes, original_format, optimised, target))
    }
}

/// Map service failures. 401 is a credential problem, 429 an exhausted quota.
async fn check_status(resp: Response, op: &str) -> Result<Response, EncodeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ServiceError>(&body)
        .map(|e| format!("{}: {}", e.error, e.message))
        .unwrap_or(body);
    warn!("remote engine {} failed status={} detail={}", op, status.as_u16(), detail);

    let kind = match status {
        StatusCode::UNAUTHORIZED => EncodeErrorKind::Credentials,
        StatusCode::TOO_MANY_REQUESTS => EncodeErrorKind::Quota,
        _ => EncodeErrorKind::Conversion,
    };
    Err(EncodeError::new(kind, format!("{op} HTTP {}: {detail}", status.as_u16())))
}
