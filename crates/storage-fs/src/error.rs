//! Error types for the filesystem backend.

use std::io::ErrorKind;

use picstash_transfer::{RawError, codes};

/// Errors produced while moving objects in and out of the store.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("cancelled")]
    Cancelled,

    #[error("no tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl FsError {
    /// Raw code reported to the transfer layer.
    pub fn code(&self) -> i64 {
        match self {
            FsError::Io(e) => match e.kind() {
                ErrorKind::NotFound => codes::OBJECT_NOT_FOUND,
                ErrorKind::PermissionDenied => codes::UNAUTHORIZED,
                _ => codes::INTERNAL,
            },
            FsError::NotFound(_) => codes::OBJECT_NOT_FOUND,
            FsError::ChecksumMismatch { .. } => codes::CHECKSUM_MISMATCH,
            FsError::Cancelled => codes::CANCELLED,
            FsError::Metadata(_) | FsError::NoRuntime(_) => codes::INTERNAL,
        }
    }

    pub fn to_raw(&self) -> RawError {
        RawError::new(self.code(), self.to_string())
    }
}
