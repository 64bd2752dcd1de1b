//! Contract between transfer tasks and the storage service client.
//!
//! A backend performs the actual I/O. It hands out one [`BackendHandle`] per
//! operation and reports what happens to that operation as [`BackendEvent`]s
//! on an unbounded channel created with [`event_channel`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ResourcePath;

/// Correlates backend events with the operation that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendHandle(u64);

impl BackendHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Raw kind of a backend event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendEventKind {
    Progress,
    Paused,
    Resumed,
    Succeeded,
    Failed,
}

/// Unclassified backend error: a numeric code plus diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawError {
    pub code: i64,
    pub message: String,
}

impl RawError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// One event reported by the backend for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEvent {
    pub handle: BackendHandle,
    pub kind: BackendEventKind,
    pub bytes_transferred: Option<u64>,
    pub total_bytes: Option<u64>,
    pub error: Option<RawError>,
}

impl BackendEvent {
    fn bare(handle: BackendHandle, kind: BackendEventKind) -> Self {
        Self {
            handle,
            kind,
            bytes_transferred: None,
            total_bytes: None,
            error: None,
        }
    }

    pub fn progress(handle: BackendHandle, bytes_transferred: u64, total_bytes: Option<u64>) -> Self {
        Self {
            bytes_transferred: Some(bytes_transferred),
            total_bytes,
            ..Self::bare(handle, BackendEventKind::Progress)
        }
    }

    pub fn paused(handle: BackendHandle) -> Self {
        Self::bare(handle, BackendEventKind::Paused)
    }

    pub fn resumed(handle: BackendHandle) -> Self {
        Self::bare(handle, BackendEventKind::Resumed)
    }

    pub fn succeeded(handle: BackendHandle) -> Self {
        Self::bare(handle, BackendEventKind::Succeeded)
    }

    pub fn failed(handle: BackendHandle, code: i64, message: impl Into<String>) -> Self {
        Self {
            error: Some(RawError::new(code, message)),
            ..Self::bare(handle, BackendEventKind::Failed)
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<BackendEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<BackendEvent>;

/// Creates the channel a backend reports on.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Storage service client performing the actual transfers.
///
/// Implementations must not block: `begin_*` registers the operation and
/// returns, with the work continuing on an execution context of the backend's
/// choosing. `pause`, `resume` and `cancel` are requests; the backend does not
/// acknowledge them with events. It emits `Paused`/`Resumed` only for
/// suspensions it initiates itself (e.g. loss of connectivity).
///
/// After `cancel`, the backend must abort and release partial resources such
/// as a partially written destination file.
pub trait TransferBackend: Send + Sync {
    /// Short identifier for logs, e.g. `"fs"`.
    fn provider(&self) -> &'static str;

    fn begin_upload(
        &self,
        path: &ResourcePath,
        payload: Arc<[u8]>,
        content_type: &str,
    ) -> Result<BackendHandle, RawError>;

    fn begin_download(&self, path: &ResourcePath, destination: &Path) -> Result<BackendHandle, RawError>;

    fn pause(&self, handle: BackendHandle);

    fn resume(&self, handle: BackendHandle);

    fn cancel(&self, handle: BackendHandle);
}
