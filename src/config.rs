use serde::Deserialize;

use crate::codec::{QualityPolicy, Strategy};
use crate::detect::format::ImageFormat;

/// Longest edge allowed before the local engine resizes (width).
pub const DEFAULT_MAX_WIDTH: u32 = 2048;

/// Longest edge allowed before the local engine resizes (height).
pub const DEFAULT_MAX_HEIGHT: u32 = 2048;

/// Quality used for sources above the adaptive size threshold.
pub const DEFAULT_QUALITY_ABOVE_THRESHOLD: u8 = 100;

/// Quality used for sources at or below the adaptive size threshold.
pub const DEFAULT_QUALITY_BELOW_THRESHOLD: u8 = 80;

/// Size threshold for the adaptive quality policy (1 MB).
pub const DEFAULT_QUALITY_THRESHOLD_BYTES: u64 = 1024 * 1024;

/// Upper bound on a single source fetch.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Remote optimisation service endpoint.
pub const DEFAULT_REMOTE_ENDPOINT: &str = "https://api.tinify.com";

/// Admin API version used for origin image calls.
pub const DEFAULT_ORIGIN_API_VERSION: &str = "2024-01";

/// Collection holding compressed artifact records.
pub const COMPRESSED_COLLECTION: &str = "compressed_images";

/// Collection holding pristine original records.
pub const ORIGINALS_COLLECTION: &str = "original_images";

/// Top-level configuration for the image engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub fetch: FetchConfig,
    pub local: LocalEngineConfig,
    /// Remote engine credentials. `None` disables [`Strategy::Remote`].
    pub remote: Option<RemoteEngineConfig>,
    pub origin: OriginConfig,
    /// Serialise concurrent batches touching the same canonical key (in-process only).
    pub per_key_claims: bool,
    /// Strategy used when a request does not name one.
    pub default_strategy: Strategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            fetch: FetchConfig::default(),
            local: LocalEngineConfig::default(),
            remote: None,
            origin: OriginConfig::default(),
            per_key_claims: false,
            default_strategy: Strategy::Local,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Base URL under which blobs are publicly reachable.
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            public_base_url: "http://127.0.0.1:8080/blobs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for blob files.
    pub blob_root: String,
    /// JSON file holding the record collections. `None` keeps records in memory.
    pub records_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_root: "./data/blobs".to_string(),
            records_path: Some("./data/records.json".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            user_agent: concat!("ma-image-engine/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalEngineConfig {
    pub max_width: u32,
    pub max_height: u32,
    /// Target format when the native format is not re-encodable.
    pub default_format: ImageFormat,
    pub quality: QualityPolicy,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            max_height: DEFAULT_MAX_HEIGHT,
            default_format: ImageFormat::Jpeg,
            quality: QualityPolicy::SizeAdaptive {
                threshold_bytes: DEFAULT_QUALITY_THRESHOLD_BYTES,
                above: DEFAULT_QUALITY_ABOVE_THRESHOLD,
                below: DEFAULT_QUALITY_BELOW_THRESHOLD,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteEngineConfig {
    pub api_key: String,
    #[serde(default = "default_remote_endpoint")]
    pub endpoint: String,
}

fn default_remote_endpoint() -> String {
    DEFAULT_REMOTE_ENDPOINT.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    pub api_version: String,
    /// `{shop}` is replaced with the tenant's shop domain.
    pub base_url_template: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_ORIGIN_API_VERSION.to_string(),
            base_url_template: "https://{shop}".to_string(),
        }
    }
}
