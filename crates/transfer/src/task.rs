//! The transfer task state machine.
//!
//! All observer callbacks for one task run one at a time, in the order the
//! underlying transitions happened. Transitions append to a per-task queue
//! under the state lock; whichever caller holds the delivery lock drains it.
//! Callbacks run without the state lock held, so they may call back into the
//! task (e.g. `cancel()` from a progress observer).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, TryLockError, Weak};

use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::backend::{BackendHandle, RawError};
use crate::client::Router;
use crate::observer::ObserverRegistry;
use crate::{
    Direction, EventKind, InvalidStateError, ObserverHandle, ProgressSnapshot, ResourcePath,
    TaskId, TaskReport, TaskState, TransferBackend, TransferError, TransferEvent, TransferRequest,
    lock,
};

/// A classified backend event addressed to one task.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TaskUpdate {
    Progress {
        bytes_transferred: Option<u64>,
        total_bytes: Option<u64>,
    },
    Paused,
    Resumed,
    Succeeded,
    Failed(TransferError),
}

/// One upload or download.
///
/// Created in [`TaskState::Pending`] by [`TransferClient`](crate::TransferClient).
/// Dropping a started, unfinished task aborts the backend operation without
/// notifying observers.
pub struct TransferTask {
    shared: Arc<TaskShared>,
}

/// Cancels a [`TransferTask`] without owning it.
///
/// Does nothing once the task has been dropped.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Weak<TaskShared>,
}

impl CancelHandle {
    /// Cancels the task. Returns `true` if it was still unfinished.
    pub fn cancel(&self) -> bool {
        self.shared.upgrade().is_some_and(|shared| shared.cancel())
    }
}

pub(crate) struct TaskShared {
    id: TaskId,
    resource_path: ResourcePath,
    request: TransferRequest,
    backend: Arc<dyn TransferBackend>,
    router: Arc<Router>,
    inner: Mutex<TaskInner>,
    delivery: Mutex<()>,
    state_tx: watch::Sender<TaskState>,
}

struct TaskInner {
    state: TaskState,
    handle: Option<BackendHandle>,
    /// Set when `cancel()` lands while the backend is still starting.
    abort_on_begin: bool,
    bytes_transferred: u64,
    total_bytes: Option<u64>,
    last_error: Option<TransferError>,
    observers: ObserverRegistry,
    queue: VecDeque<TransferEvent>,
}

impl TransferTask {
    pub(crate) fn new(
        backend: Arc<dyn TransferBackend>,
        router: Arc<Router>,
        resource_path: ResourcePath,
        request: TransferRequest,
    ) -> Self {
        let (state_tx, _) = watch::channel(TaskState::Pending);
        Self {
            shared: Arc::new(TaskShared {
                id: TaskId::new(),
                resource_path,
                request,
                backend,
                router,
                inner: Mutex::new(TaskInner {
                    state: TaskState::Pending,
                    handle: None,
                    abort_on_begin: false,
                    bytes_transferred: 0,
                    total_bytes: None,
                    last_error: None,
                    observers: ObserverRegistry::default(),
                    queue: VecDeque::new(),
                }),
                delivery: Mutex::new(()),
                state_tx,
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn direction(&self) -> Direction {
        self.shared.request.direction()
    }

    pub fn resource_path(&self) -> &ResourcePath {
        &self.shared.resource_path
    }

    pub fn request(&self) -> &TransferRequest {
        &self.shared.request
    }

    pub fn state(&self) -> TaskState {
        lock(&self.shared.inner).state
    }

    /// Backend handle, once started.
    pub fn handle(&self) -> Option<BackendHandle> {
        lock(&self.shared.inner).handle
    }

    pub fn progress(&self) -> ProgressSnapshot {
        let inner = lock(&self.shared.inner);
        ProgressSnapshot::new(inner.bytes_transferred, inner.total_bytes)
    }

    pub fn bytes_transferred(&self) -> u64 {
        lock(&self.shared.inner).bytes_transferred
    }

    pub fn total_bytes(&self) -> Option<u64> {
        lock(&self.shared.inner).total_bytes
    }

    pub fn last_error(&self) -> Option<TransferError> {
        lock(&self.shared.inner).last_error.clone()
    }

    pub fn report(&self) -> TaskReport {
        let inner = lock(&self.shared.inner);
        let progress = ProgressSnapshot::new(inner.bytes_transferred, inner.total_bytes);
        TaskReport {
            id: self.shared.id,
            direction: self.direction(),
            resource_path: self.shared.resource_path.clone(),
            state: inner.state,
            bytes_transferred: inner.bytes_transferred,
            total_bytes: inner.total_bytes,
            percent_complete: progress.percent_complete(),
            error: inner.last_error.as_ref().map(ToString::to_string),
        }
    }

    // -- observers ----------------------------------------------------------

    /// Registers `callback` for events of `kind`.
    ///
    /// Observers of the same kind run in registration order. An observer
    /// removed while an event is being delivered may still see that event.
    pub fn add_observer<F>(&self, kind: EventKind, callback: F) -> ObserverHandle
    where
        F: Fn(&TransferEvent) + Send + Sync + 'static,
    {
        lock(&self.shared.inner)
            .observers
            .add(kind, Arc::new(callback))
    }

    pub fn on_progress<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(ProgressSnapshot) + Send + Sync + 'static,
    {
        self.add_observer(EventKind::Progress, move |event| {
            if let TransferEvent::Progress(snapshot) = event {
                callback(*snapshot);
            }
        })
    }

    pub fn on_succeeded<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add_observer(EventKind::Succeeded, move |_| callback())
    }

    pub fn on_failed<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&TransferError) + Send + Sync + 'static,
    {
        self.add_observer(EventKind::Failed, move |event| {
            if let TransferEvent::Failed(error) = event {
                callback(error);
            }
        })
    }

    /// Detaches an observer. Returns `false` if it was already removed.
    pub fn remove_observer(&self, handle: ObserverHandle) -> bool {
        lock(&self.shared.inner).observers.remove(handle)
    }

    // -- operations ---------------------------------------------------------

    /// Asks the backend to begin moving bytes. Pending -> Running.
    ///
    /// A backend that refuses to begin fails the task through the regular
    /// `Failed` path; the call itself still succeeds.
    pub fn start(&self) -> Result<(), InvalidStateError> {
        let shared = &self.shared;
        shared.transition("start", TaskState::Pending, TaskState::Running, None)?;
        debug!(
            task = %shared.id,
            direction = %self.direction(),
            path = %shared.resource_path,
            provider = shared.backend.provider(),
            "starting transfer"
        );

        let begun = shared.router.register_with(shared, || {
            let handle = shared.begin()?;
            lock(&shared.inner).handle = Some(handle);
            Ok(handle)
        });

        match begun {
            Ok(handle) => {
                let abort = std::mem::take(&mut lock(&shared.inner).abort_on_begin);
                if abort {
                    debug!(task = %shared.id, %handle, "cancelled while starting, aborting backend operation");
                    shared.backend.cancel(handle);
                    shared.router.unregister(handle);
                } else {
                    trace!(task = %shared.id, %handle, "backend operation started");
                }
            }
            Err(raw) => {
                warn!(task = %shared.id, error = %raw, "backend refused to start transfer");
                let error = shared.router.classifier().classify(&raw);
                shared.fail(error);
            }
        }

        shared.flush();
        Ok(())
    }

    /// Running -> Paused. Bytes already transferred are kept.
    pub fn pause(&self) -> Result<(), InvalidStateError> {
        let shared = &self.shared;
        let handle = shared.transition(
            "pause",
            TaskState::Running,
            TaskState::Paused,
            Some(TransferEvent::Paused),
        )?;
        debug!(task = %shared.id, "pausing transfer");
        if let Some(handle) = handle {
            shared.backend.pause(handle);
        }
        shared.flush();
        Ok(())
    }

    /// Paused -> Running.
    pub fn resume(&self) -> Result<(), InvalidStateError> {
        let shared = &self.shared;
        let handle = shared.transition(
            "resume",
            TaskState::Paused,
            TaskState::Running,
            Some(TransferEvent::Resumed),
        )?;
        debug!(task = %shared.id, "resuming transfer");
        if let Some(handle) = handle {
            shared.backend.resume(handle);
        }
        shared.flush();
        Ok(())
    }

    /// Aborts the transfer. No-op once the task is terminal.
    ///
    /// Observers get a `Failed(Cancelled)` event. Returns without waiting for
    /// the backend; events it still sends for this task are discarded.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// A detached handle that can cancel this task from another context.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Creates a fresh pending task for the same request.
    ///
    /// Counters start from zero and no observers are carried over. Only valid
    /// once the task has failed or been cancelled.
    pub fn retry(&self) -> Result<TransferTask, InvalidStateError> {
        let state = self.state();
        if !matches!(state, TaskState::Failed | TaskState::Cancelled) {
            return Err(InvalidStateError {
                operation: "retry",
                state,
            });
        }
        Ok(TransferTask::new(
            Arc::clone(&self.shared.backend),
            Arc::clone(&self.shared.router),
            self.shared.resource_path.clone(),
            self.shared.request.clone(),
        ))
    }

    /// Result of a terminal task, `None` while it can still change.
    pub fn outcome(&self) -> Option<Result<(), TransferError>> {
        let inner = lock(&self.shared.inner);
        match inner.state {
            TaskState::Succeeded => Some(Ok(())),
            TaskState::Failed | TaskState::Cancelled => Some(Err(inner
                .last_error
                .clone()
                .unwrap_or(TransferError::Cancelled))),
            TaskState::Pending | TaskState::Running | TaskState::Paused => None,
        }
    }

    /// Waits until the task is terminal and returns its outcome.
    ///
    /// Observers for the terminal event have run by the time this resolves.
    pub async fn wait(&self) -> Result<(), TransferError> {
        let mut rx = self.shared.state_tx.subscribe();
        // The sender lives in `self.shared`, so this only ends on a terminal state.
        let _ = rx.wait_for(|state| state.is_terminal()).await;
        self.outcome().unwrap_or(Err(TransferError::Cancelled))
    }
}

impl Drop for TransferTask {
    fn drop(&mut self) {
        let shared = &self.shared;
        let handle = {
            let mut inner = lock(&shared.inner);
            if !inner.state.is_active() {
                return;
            }
            inner.state = TaskState::Cancelled;
            inner.last_error = Some(TransferError::Cancelled);
            inner.queue.clear();
            inner.handle
        };
        debug!(task = %shared.id, "task dropped while active, aborting backend operation");
        if let Some(handle) = handle {
            shared.backend.cancel(handle);
            shared.router.unregister(handle);
        }
        shared.state_tx.send_replace(TaskState::Cancelled);
    }
}

impl TaskShared {
    fn begin(&self) -> Result<BackendHandle, RawError> {
        match &self.request {
            TransferRequest::Upload {
                payload,
                content_type,
            } => self
                .backend
                .begin_upload(&self.resource_path, Arc::clone(payload), content_type),
            TransferRequest::Download { destination } => {
                self.backend.begin_download(&self.resource_path, destination)
            }
        }
    }

    /// Returns `true` if this call moved the task to Cancelled.
    fn cancel(&self) -> bool {
        let handle = {
            let mut inner = lock(&self.inner);
            if inner.state.is_terminal() {
                return false;
            }
            if inner.state == TaskState::Running && inner.handle.is_none() {
                inner.abort_on_begin = true;
            }
            inner.state = TaskState::Cancelled;
            inner.last_error = Some(TransferError::Cancelled);
            inner
                .queue
                .push_back(TransferEvent::Failed(TransferError::Cancelled));
            inner.handle
        };

        debug!(task = %self.id, "cancelling transfer");
        if let Some(handle) = handle {
            self.backend.cancel(handle);
            self.router.unregister(handle);
        }
        self.flush();
        true
    }

    /// Moves `from -> to`, optionally queueing `event`, and returns the handle.
    fn transition(
        &self,
        operation: &'static str,
        from: TaskState,
        to: TaskState,
        event: Option<TransferEvent>,
    ) -> Result<Option<BackendHandle>, InvalidStateError> {
        let mut inner = lock(&self.inner);
        if inner.state != from {
            return Err(InvalidStateError {
                operation,
                state: inner.state,
            });
        }
        inner.state = to;
        if let Some(event) = event {
            inner.queue.push_back(event);
        }
        Ok(inner.handle)
    }

    fn fail(&self, error: TransferError) {
        let mut inner = lock(&self.inner);
        if inner.state.is_terminal() {
            return;
        }
        inner.abort_on_begin = false;
        inner.state = TaskState::Failed;
        inner.last_error = Some(error.clone());
        inner.queue.push_back(TransferEvent::Failed(error));
    }

    /// Applies a backend event. Events for terminal tasks are dropped.
    pub(crate) fn deliver(&self, handle: BackendHandle, update: TaskUpdate) {
        let state = {
            let mut inner = lock(&self.inner);
            if inner.state.is_terminal() {
                trace!(task = %self.id, %handle, ?update, "discarding event for finished task");
                return;
            }

            match update {
                TaskUpdate::Progress {
                    bytes_transferred,
                    total_bytes,
                } => self.apply_progress(&mut inner, bytes_transferred, total_bytes),
                TaskUpdate::Paused => {
                    if inner.state == TaskState::Running {
                        debug!(task = %self.id, "backend suspended transfer");
                        inner.state = TaskState::Paused;
                        inner.queue.push_back(TransferEvent::Paused);
                    }
                }
                TaskUpdate::Resumed => {
                    if inner.state == TaskState::Paused {
                        debug!(task = %self.id, "backend resumed transfer");
                        inner.state = TaskState::Running;
                        inner.queue.push_back(TransferEvent::Resumed);
                    }
                }
                TaskUpdate::Succeeded => {
                    debug!(
                        task = %self.id,
                        bytes = inner.bytes_transferred,
                        "transfer succeeded"
                    );
                    inner.state = TaskState::Succeeded;
                    inner.queue.push_back(TransferEvent::Succeeded);
                }
                TaskUpdate::Failed(error) => {
                    debug!(task = %self.id, error = %error, "transfer failed");
                    inner.state = if error == TransferError::Cancelled {
                        TaskState::Cancelled
                    } else {
                        TaskState::Failed
                    };
                    inner.last_error = Some(error.clone());
                    inner.queue.push_back(TransferEvent::Failed(error));
                }
            }
            inner.state
        };

        if state.is_terminal() {
            self.router.unregister(handle);
        }
        self.flush();
    }

    fn apply_progress(&self, inner: &mut TaskInner, bytes: Option<u64>, total: Option<u64>) {
        // A zero total means "not known yet".
        if let Some(total) = total.filter(|t| *t > 0) {
            match inner.total_bytes {
                None => inner.total_bytes = Some(total),
                Some(known) if known != total => {
                    warn!(task = %self.id, known, reported = total, "backend changed total size, keeping the first");
                }
                Some(_) => {}
            }
        }

        if let Some(bytes) = bytes {
            if bytes >= inner.bytes_transferred {
                inner.bytes_transferred = bytes;
            } else {
                warn!(
                    task = %self.id,
                    current = inner.bytes_transferred,
                    reported = bytes,
                    "ignoring decreasing byte count"
                );
            }
        }

        // Paused tasks keep counting in-flight bytes but stay silent.
        if inner.state == TaskState::Running {
            let snapshot = ProgressSnapshot::new(inner.bytes_transferred, inner.total_bytes);
            inner.queue.push_back(TransferEvent::Progress(snapshot));
        }
    }

    /// Runs queued observer callbacks unless another caller is already doing
    /// so, then publishes the state to waiters. Whoever holds `delivery`
    /// publishes, so `wait` never sees a state before its events are delivered.
    fn flush(&self) {
        loop {
            let guard = match self.delivery.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                // The current deliverer drains what we queued.
                Err(TryLockError::WouldBlock) => return,
            };

            let state = loop {
                let (event, observers) = {
                    let mut inner = lock(&self.inner);
                    let Some(event) = inner.queue.pop_front() else {
                        break inner.state;
                    };
                    let observers = inner.observers.matching(event.kind());
                    (event, observers)
                };
                for observer in observers {
                    observer(&event);
                }
            };
            self.state_tx.send_replace(state);

            drop(guard);
            let inner = lock(&self.inner);
            if inner.queue.is_empty() && inner.state == state {
                return;
            }
        }
    }

}
