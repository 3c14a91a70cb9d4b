use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OriginError;

/// Per-tenant credentials supplied by the caller with each request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginAuth {
    /// Tenant shop domain, e.g. `example.myshopify.com`.
    pub shop: String,
    pub access_token: String,
}

impl OriginAuth {
    /// Origin calls are never made without a non-empty token.
    pub fn is_usable(&self) -> bool {
        !self.shop.trim().is_empty() && !self.access_token.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedImage {
    pub id: String,
    /// Live URL assigned by the platform, if it reported one.
    pub src: Option<String>,
}

#[async_trait]
pub trait OriginPlatform: Send + Sync {
    async fn create_image(&self, auth: &OriginAuth, product_id: &str, src: &str) -> Result<CreatedImage, OriginError>;

    async fn delete_image(&self, auth: &OriginAuth, product_id: &str, image_id: &str) -> Result<(), OriginError>;
}
