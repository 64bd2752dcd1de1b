//! Backend-facing adapter: creates tasks and routes backend events to them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, trace};

use crate::backend::{BackendEvent, BackendEventKind, BackendHandle, EventReceiver, RawError};
use crate::classify::codes;
use crate::task::{TaskShared, TaskUpdate};
use crate::{
    ErrorClassifier, ResourcePath, TransferBackend, TransferError, TransferRequest, TransferTask,
    lock,
};

/// Entry point for creating transfer tasks against one backend.
///
/// Cloning is cheap; clones share the backend and the routing table.
#[derive(Clone)]
pub struct TransferClient {
    backend: Arc<dyn TransferBackend>,
    router: Arc<Router>,
}

impl TransferClient {
    pub fn new(backend: Arc<dyn TransferBackend>) -> Self {
        Self::with_classifier(backend, ErrorClassifier::default())
    }

    pub fn with_classifier(backend: Arc<dyn TransferBackend>, classifier: ErrorClassifier) -> Self {
        Self {
            backend,
            router: Arc::new(Router {
                routes: Mutex::new(HashMap::new()),
                classifier,
            }),
        }
    }

    /// Creates a pending upload of `payload` to `path`.
    pub fn upload(
        &self,
        path: ResourcePath,
        payload: impl Into<Arc<[u8]>>,
        content_type: impl Into<String>,
    ) -> TransferTask {
        self.task(
            path,
            TransferRequest::Upload {
                payload: payload.into(),
                content_type: content_type.into(),
            },
        )
    }

    /// Creates a pending download of `path` into `destination`.
    pub fn download(&self, path: ResourcePath, destination: impl Into<PathBuf>) -> TransferTask {
        self.task(
            path,
            TransferRequest::Download {
                destination: destination.into(),
            },
        )
    }

    pub fn task(&self, path: ResourcePath, request: TransferRequest) -> TransferTask {
        TransferTask::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.router),
            path,
            request,
        )
    }

    /// Delivers one backend event to the task that owns its handle.
    ///
    /// Returns `false` if no live task claims the handle; the event is dropped.
    pub fn dispatch(&self, event: BackendEvent) -> bool {
        self.router.dispatch(event)
    }

    /// Dispatches events until every sender has been dropped.
    pub async fn route_events(&self, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            self.router.dispatch(event);
        }
        debug!(
            provider = self.backend.provider(),
            "backend event channel closed"
        );
    }

    /// Number of started, unfinished tasks still owned by a caller.
    pub fn active_tasks(&self) -> usize {
        let mut routes = lock(&self.router.routes);
        routes.retain(|_, task| task.strong_count() > 0);
        routes.len()
    }

    pub fn backend(&self) -> &Arc<dyn TransferBackend> {
        &self.backend
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.router.classifier
    }
}

/// Weak correlation table from backend handle to task.
pub(crate) struct Router {
    routes: Mutex<HashMap<BackendHandle, Weak<TaskShared>>>,
    classifier: ErrorClassifier,
}

impl Router {
    pub(crate) fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Runs `begin` and records the handle it returns for `task`.
    ///
    /// The table stays locked while `begin` runs, so an event the backend
    /// emits right away waits in `dispatch` until the route exists.
    pub(crate) fn register_with<F>(
        &self,
        task: &Arc<TaskShared>,
        begin: F,
    ) -> Result<BackendHandle, RawError>
    where
        F: FnOnce() -> Result<BackendHandle, RawError>,
    {
        let mut routes = lock(&self.routes);
        let handle = begin()?;
        routes.insert(handle, Arc::downgrade(task));
        Ok(handle)
    }

    pub(crate) fn unregister(&self, handle: BackendHandle) {
        lock(&self.routes).remove(&handle);
    }

    fn dispatch(&self, event: BackendEvent) -> bool {
        let task = {
            let mut routes = lock(&self.routes);
            match routes.get(&event.handle).map(Weak::upgrade) {
                Some(Some(task)) => task,
                Some(None) => {
                    routes.remove(&event.handle);
                    trace!(handle = %event.handle, kind = ?event.kind, "discarding event for dropped task");
                    return false;
                }
                None => {
                    trace!(handle = %event.handle, kind = ?event.kind, "discarding event for unknown handle");
                    return false;
                }
            }
        };

        let handle = event.handle;
        task.deliver(handle, self.to_update(event));
        true
    }

    fn to_update(&self, event: BackendEvent) -> TaskUpdate {
        match event.kind {
            BackendEventKind::Progress => TaskUpdate::Progress {
                bytes_transferred: event.bytes_transferred,
                total_bytes: event.total_bytes,
            },
            BackendEventKind::Paused => TaskUpdate::Paused,
            BackendEventKind::Resumed => TaskUpdate::Resumed,
            BackendEventKind::Succeeded => TaskUpdate::Succeeded,
            BackendEventKind::Failed => {
                let error = match &event.error {
                    Some(raw) => self.classifier.classify(raw),
                    None => TransferError::Unknown {
                        code: codes::UNSPECIFIED,
                        message: "backend reported failure without an error".into(),
                    },
                };
                TaskUpdate::Failed(error)
            }
        }
    }
}
