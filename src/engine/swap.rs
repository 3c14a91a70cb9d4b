// Best-effort origin swap: create the replacement image, then delete the old one.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::origin::traits::{OriginAuth, OriginPlatform};

/// Outcome of an origin swap, reported inline and never escalated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapReport {
    pub attempted: bool,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_image_src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SwapReport {
    /// Swap was requested but could not be attempted.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct OriginSwapper {
    platform: Arc<dyn OriginPlatform>,
}

impl OriginSwapper {
    pub fn new(platform: Arc<dyn OriginPlatform>) -> Self {
        Self { platform }
    }

    /// Point `product_id` at `new_src`, then remove `old_image_id` if given.
    ///
    /// Without a usable token the platform is never called.
    pub async fn swap(
        &self,
        auth: Option<&OriginAuth>,
        product_id: &str,
        new_src: &str,
        old_image_id: Option<&str>,
    ) -> SwapReport {
        let Some(auth) = auth.filter(|a| a.is_usable()) else {
            return SwapReport::skipped("missing origin access token");
        };

        let mut report = SwapReport {
            attempted: true,
            ..SwapReport::default()
        };

        let created = match self.platform.create_image(auth, product_id, new_src).await {
            Ok(created) => created,
            Err(e) => {
                warn!("origin swap create failed product={}: {}", product_id, e);
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.new_image_id = Some(created.id.clone());
        report.new_image_src = created.src;

        if let Some(old) = old_image_id.filter(|id| !id.is_empty()) {
            if let Err(e) = self.platform.delete_image(auth, product_id, old).await {
                warn!(
                    "origin swap created image={} but delete of {} failed product={}: {}",
                    created.id, old, product_id, e
                );
                report.error = Some(format!("created image {} but could not delete {old}: {e}", created.id));
                return report;
            }
            report.deleted_image_id = Some(old.to_string());
        }

        info!("origin swap product={} new_image={}", product_id, created.id);
        report.succeeded = true;
        report
    }
}
