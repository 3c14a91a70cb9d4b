// Error taxonomy shared by the fetch, encode, storage, origin and revert paths.

use serde::Serialize;
use thiserror::Error;

use crate::codec::Strategy;

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Source fetch failed: transport error (`status == None`) or non-2xx response.
#[derive(Debug, Clone, Error)]
#[error("fetch failed{}: {message}", status_suffix(.status))]
pub struct FetchError {
    pub status: Option<u16>,
    pub message: String,
}

impl FetchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeErrorKind {
    Decode,
    Transcode,
    Conversion,
    Fetch,
    Quota,
    Credentials,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?} error: {message}")]
pub struct EncodeError {
    pub kind: EncodeErrorKind,
    pub message: String,
}

impl EncodeError {
    pub fn new(kind: EncodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob write failed for {path}: {message}")]
    BlobWrite { path: String, message: String },

    #[error("blob read failed for {path}: {message}")]
    BlobRead { path: String, message: String },

    #[error("record store error in {collection}: {message}")]
    Record { collection: String, message: String },

    #[error("malformed record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Origin platform call failed. Always reported inline, never escalated.
#[derive(Debug, Clone, Error)]
#[error("origin call failed{}: {message}", status_suffix(.status))]
pub struct OriginError {
    pub status: Option<u16>,
    pub message: String,
}

impl OriginError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Whole-batch precondition violations. Reported once per request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("no source urls supplied")]
    EmptyBatch,

    #[error("strategy {0:?} has no credentials configured")]
    MissingCredentials(Strategy),

    #[error("{field} has {got} entries but {expected} urls were supplied")]
    MisalignedOrigins {
        field: &'static str,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Error)]
pub enum RevertError {
    #[error("no archived original for {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
