//! Error types.
//!
//! `FormatError` covers malformed binary input and is produced by the DEX,
//! class-file and binary XML parsers. `DaemonError` is everything the HTTP
//! surface can report; each variant owns exactly one status code.

use axum::http::StatusCode;
use thiserror::Error;

use crate::signature::SignatureError;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Unexpected end of data at offset {offset:#x} (needed {needed} bytes)")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("Bad magic: {0}")]
    BadMagic(String),

    #[error("{kind} index {index} out of range (table size {len})")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Malformed {0}")]
    Malformed(String),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

pub type FormatResult<T> = std::result::Result<T, FormatError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Missing required query parameter `{0}`.")]
    MissingParameter(&'static str),

    #[error("Cannot find instance by provided instance id: {0}")]
    InstanceNotFound(String),

    #[error(
        "Max instance count reached, please use unload one instance or use `update_max_instance_count` to update max instance count."
    )]
    CapacityReached,

    #[error("Count must be positive")]
    InvalidCount,

    #[error(transparent)]
    InvalidSignature(#[from] SignatureError),

    #[error("AndroidManifest.xml not found or failed to load.")]
    ManifestNotFound,

    #[error("Cannot find class `{0}`.")]
    ClassNotFound(String),

    #[error("Cannot find method `{0}`.")]
    MethodNotFound(String),

    #[error("Cannot find caller for method `{0}`.")]
    MethodCallersNotFound(String),

    #[error("Cannot find caller for class `{0}`.")]
    ClassCallersNotFound(String),

    #[error("Cannot find overrides for method `{0}`.")]
    OverridesNotFound(String),

    #[error("Failed to load `{path}`: {source:#}")]
    LoadFailed {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}

impl DaemonError {
    pub fn status(&self) -> StatusCode {
        match self {
            DaemonError::MissingParameter(_)
            | DaemonError::InvalidCount
            | DaemonError::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            DaemonError::ManifestNotFound
            | DaemonError::ClassNotFound(_)
            | DaemonError::MethodNotFound(_)
            | DaemonError::MethodCallersNotFound(_)
            | DaemonError::ClassCallersNotFound(_)
            | DaemonError::OverridesNotFound(_) => StatusCode::NOT_FOUND,
            DaemonError::InstanceNotFound(_)
            | DaemonError::CapacityReached
            | DaemonError::LoadFailed { .. }
            | DaemonError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
