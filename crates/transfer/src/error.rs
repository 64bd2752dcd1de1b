//! Error types for transfer tasks.

use serde::{Deserialize, Serialize};

use crate::TaskState;

/// Classified reason a transfer failed.
///
/// Delivered to `Failed` observers and returned by [`TransferTask::wait`](crate::TransferTask::wait).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// The named resource does not exist.
    #[error("resource not found")]
    ResourceNotFound,

    /// The caller lacks permission for the resource.
    #[error("unauthorized")]
    Unauthorized,

    /// The operation was aborted via `cancel()`.
    #[error("cancelled")]
    Cancelled,

    /// Any backend error the classifier does not recognize.
    #[error("backend error {code}: {message}")]
    Unknown { code: i64, message: String },
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::ResourceNotFound => ErrorKind::ResourceNotFound,
            TransferError::Unauthorized => ErrorKind::Unauthorized,
            TransferError::Cancelled => ErrorKind::Cancelled,
            TransferError::Unknown { .. } => ErrorKind::Unknown,
        }
    }
}

/// Discriminant of [`TransferError`], used in classification tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ResourceNotFound,
    Unauthorized,
    Cancelled,
    Unknown,
}

/// An operation was invoked in a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {operation} a {state} task")]
pub struct InvalidStateError {
    pub operation: &'static str,
    pub state: TaskState,
}
