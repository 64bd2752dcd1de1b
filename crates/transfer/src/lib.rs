//! Observable, resumable upload/download tasks.
//!
//! A [`TransferTask`] models one upload or one download as a small state
//! machine driven by events from an injected [`TransferBackend`]. Callers
//! register observers per [`EventKind`] and react to progress, pause/resume,
//! success and classified failure.
//!
//! # Wiring
//!
//! 1. Create a channel with [`event_channel`] and hand the sender to the backend.
//! 2. Wrap the backend in a [`TransferClient`] and run
//!    [`TransferClient::route_events`] on the receiver.
//! 3. Create tasks with [`TransferClient::upload`] / [`TransferClient::download`].

mod backend;
mod classify;
mod client;
mod content_type;
mod error;
mod observer;
mod progress;
mod resource;
mod retry;
mod task;
mod types;

#[cfg(test)]
mod test_support;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use backend::{
    BackendEvent, BackendEventKind, BackendHandle, EventReceiver, EventSender, RawError,
    TransferBackend, event_channel,
};
pub use classify::{ErrorClassifier, codes};
pub use client::TransferClient;
pub use content_type::{DEFAULT_CONTENT_TYPE, content_type_or_default, detect_content_type};
pub use error::{ErrorKind, InvalidStateError, TransferError};
pub use observer::{EventKind, Observer, ObserverHandle, TransferEvent};
pub use progress::{ProgressSnapshot, ThroughputMeter};
pub use resource::{ResourcePath, ResourcePathError};
pub use retry::{RetryOutcome, RetryPolicy, run_with_retry};
pub use task::{CancelHandle, TransferTask};
pub use types::{Direction, TaskId, TaskReport, TaskState, TransferRequest};

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
