use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::traits::{CreatedImage, OriginAuth, OriginPlatform};
use crate::config::OriginConfig;
use crate::error::OriginError;

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

#[derive(Debug, Deserialize)]
struct ImageEnvelope {
    image: ImageBody,
}

#[derive(Debug, Deserialize)]
struct ImageBody {
    id: serde_json::Value,
    #[serde(default)]
    src: Option<String>,
}

/// Admin REST client for product images.
pub struct HttpOriginClient {
    client: Client,
    config: OriginConfig,
}

impl HttpOriginClient {
    pub fn new(client: Client, config: OriginConfig) -> Self {
        Self { client, config }
    }

    fn base(&self, auth: &OriginAuth) -> String {
        let base = self.config.base_url_template.replace("{shop}", auth.shop.trim());
        format!("{}/admin/api/{}", base.trim_end_matches('/'), self.config.api_version)
    }

    fn authed(&self, req: RequestBuilder, auth: &OriginAuth) -> Result<RequestBuilder, OriginError> {
        if !auth.is_usable() {
            return Err(OriginError::new(None, "missing origin access token"));
        }
        Ok(req.header(ACCESS_TOKEN_HEADER, auth.access_token.as_str()))
    }
}

#[async_trait]
impl OriginPlatform for HttpOriginClient {
    async fn create_image(&self, auth: &OriginAuth, product_id: &str, src: &str) -> Result<CreatedImage, OriginError> {
        let url = format!("{}/products/{}/images.json", self.base(auth), product_id);
        let resp = self
            .authed(self.client.post(&url), auth)?
            .json(&json!({ "image": { "src": src } }))
            .send()
            .await
            .map_err(|e| OriginError::new(None, format!("create image: {e}")))?;
        let resp = check_status(resp, "create image").await?;

        let envelope: ImageEnvelope = resp
            .json()
            .await
            .map_err(|e| OriginError::new(None, format!("create image response: {e}")))?;
        // Ids arrive as JSON numbers from REST and strings from some proxies.
        let id = match envelope.image.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        debug!("origin image created product={} image={}", product_id, id);
        Ok(CreatedImage {
            id,
            src: envelope.image.src,
        })
    }

    async fn delete_image(&self, auth: &OriginAuth, product_id: &str, image_id: &str) -> Result<(), OriginError> {
        let url = format!("{}/products/{}/images/{}.json", self.base(auth), product_id, image_id);
        let resp = self
            .authed(self.client.delete(&url), auth)?
            .send()
            .await
            .map_err(|e| OriginError::new(None, format!("delete image: {e}")))?;
        check_status(resp, "delete image").await?;
        debug!("origin image deleted product={} image={}", product_id, image_id);
        Ok(())
    }
}

async fn check_status(resp: Response, op: &str) -> Result<Response, OriginError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!("origin {} failed status={} body={}", op, status.as_u16(), body);
    Err(OriginError::new(Some(status.as_u16()), format!("{op}: {body}")))
}
