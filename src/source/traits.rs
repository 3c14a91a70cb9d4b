use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchError;

/// Bytes and declared content type of a fetched source image.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Retrieve the full body at `url`. No retries.
    async fn fetch(&self, url: &str) -> Result<Fetched, FetchError>;
}
