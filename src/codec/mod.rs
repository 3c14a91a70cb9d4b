// Compression engines: two interchangeable strategies behind one contract.

pub mod local;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::detect::format::ImageFormat;
use crate::error::{BatchError, EncodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Decode, resize and re-encode in-process.
    Local,
    /// Hand the bytes to the remote optimisation service.
    Remote,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Quality selection for the local engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum QualityPolicy {
    Fixed { quality: u8 },
    /// `above` for sources larger than `threshold_bytes`, `below` otherwise.
    SizeAdaptive {
        threshold_bytes: u64,
        above: u8,
        below: u8,
    },
}

impl QualityPolicy {
    pub fn quality_for(&self, original_size: u64) -> u8 {
        let q = match *self {
            Self::Fixed { quality } => quality,
            Self::SizeAdaptive {
                threshold_bytes,
                above,
                below,
            } => {
                if original_size > threshold_bytes {
                    above
                } else {
                    below
                }
            }
        };
        q.clamp(1, 100)
    }
}

/// Per-call constraints. `None` falls back to the engine's configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeOptions {
    pub quality: Option<u8>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

/// Source bytes plus the hints engines may use to pick a target format.
#[derive(Debug, Clone, Copy)]
pub struct EncodeInput<'a> {
    pub bytes: &'a Bytes,
    pub content_type: Option<&'a str>,
    pub source_url: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct EncodeResult {
    pub buffer: Bytes,
    pub original_size: u64,
    pub compressed_size: u64,
    pub format: ImageFormat,
}

impl EncodeResult {
    /// `1 - compressed/original`, zero for an empty original.
    pub fn savings_fraction(&self) -> f64 {
        savings_fraction(self.original_size, self.compressed_size)
    }
}

pub fn savings_fraction(original_size: u64, compressed_size: u64) -> f64 {
    if original_size == 0 {
        0.0
    } else {
        1.0 - compressed_size as f64 / original_size as f64
    }
}

/// Keep the encoded bytes only if they are strictly smaller than the original.
///
/// Every successful engine result passes through here, so `compressed_size <= original_size`
/// always holds and an oversized encode yields the original bytes with zero savings.
pub fn no_worse_than_original(
    original: &Bytes,
    original_format: ImageFormat,
    encoded: Vec<u8>,
    encoded_format: ImageFormat,
) -> EncodeResult {
    let original_size = original.len() as u64;
    if encoded.len() as u64 >= original_size {
        return EncodeResult {
            buffer: original.clone(),
            original_size,
            compressed_size: original_size,
            format: original_format,
        };
    }
    EncodeResult {
        compressed_size: encoded.len() as u64,
        buffer: Bytes::from(encoded),
        original_size,
        format: encoded_format,
    }
}

/// One-shot, stateless encode of a single source image.
///
/// Failures are returned as [`EncodeError`] and never abort anything beyond the item.
#[async_trait]
pub trait CompressionEngine: Send + Sync {
    fn strategy(&self) -> Strategy;

    async fn encode(
        &self,
        input: EncodeInput<'_>,
        options: EncodeOptions,
    ) -> Result<EncodeResult, EncodeError>;
}

/// The configured engines. Remote is absent when no credentials were supplied.
#[derive(Clone)]
pub struct EngineSet {
    local: Arc<dyn CompressionEngine>,
    remote: Option<Arc<dyn CompressionEngine>>,
}

impl EngineSet {
    pub fn new(
        local: Arc<dyn CompressionEngine>,
        remote: Option<Arc<dyn CompressionEngine>>,
    ) -> Self {
        Self { local, remote }
    }

    pub fn select(&self, strategy: Strategy) -> Result<Arc<dyn CompressionEngine>, BatchError> {
        match strategy {
            Strategy::Local => Ok(Arc::clone(&self.local)),
            Strategy::Remote => self
                .remote
                .clone()
                .ok_or(BatchError::MissingCredentials(Strategy::Remote)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_keeps_smaller_encode() {
        let original = Bytes::from(vec![7u8; 100]);
        let res = no_worse_than_original(&original, ImageFormat::Png, vec![1u8; 40], ImageFormat::WebP);
        assert_eq!(res.compressed_size, 40);
        assert_eq!(res.format, ImageFormat::WebP);
        assert!((res.savings_fraction() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_guard_returns_original_when_not_smaller() {
        let original = Bytes::from(vec![7u8; 100]);
        for len in [100usize, 150] {
            let res = no_worse_than_original(&original, ImageFormat::Jpeg, vec![0u8; len], ImageFormat::Png);
            assert_eq!(res.buffer, original);
            assert_eq!(res.compressed_size, 100);
            assert_eq!(res.format, ImageFormat::Jpeg);
            assert_eq!(res.savings_fraction(), 0.0);
        }
    }

    #[test]
    fn test_size_adaptive_quality() {
        let policy = QualityPolicy::SizeAdaptive {
            threshold_bytes: 1000,
            above: 100,
            below: 75,
        };
        assert_eq!(policy.quality_for(1001), 100);
        assert_eq!(policy.quality_for(1000), 75);
        assert_eq!(QualityPolicy::Fixed { quality: 0 }.quality_for(5), 1);
    }

    #[test]
    fn test_remote_without_credentials_is_batch_error() {
        let local: Arc<dyn CompressionEngine> =
            Arc::new(local::LocalEngine::new(crate::config::LocalEngineConfig::default()));
        let set = EngineSet::new(local, None);
        assert!(set.select(Strategy::Local).is_ok());
        assert_eq!(
            set.select(Strategy::Remote).err(),
            Some(BatchError::MissingCredentials(Strategy::Remote))
        );
    }
}
