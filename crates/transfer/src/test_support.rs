//! Test backends and helpers shared by the unit tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{BackendEvent, BackendHandle, EventSender, RawError, event_channel};
use crate::{EventKind, ResourcePath, TransferBackend, TransferClient, TransferEvent, TransferTask};

pub(crate) fn resource(path: &str) -> ResourcePath {
    ResourcePath::new(path).unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    BeginUpload {
        path: String,
        len: usize,
        content_type: String,
    },
    BeginDownload {
        path: String,
        destination: String,
    },
    Pause(BackendHandle),
    Resume(BackendHandle),
    Cancel(BackendHandle),
}

/// Records every call and never emits events on its own.
#[derive(Default)]
pub(crate) struct RecordingBackend {
    next: AtomicU64,
    calls: Mutex<Vec<Call>>,
    refuse: Option<RawError>,
}

impl RecordingBackend {
    pub(crate) fn client() -> (TransferClient, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        (TransferClient::new(backend.clone()), backend)
    }

    /// A backend whose `begin_*` calls all fail with `error`.
    pub(crate) fn refusing(error: RawError) -> Self {
        Self {
            refuse: Some(error),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn cancelled(&self, handle: BackendHandle) -> bool {
        self.calls().contains(&Call::Cancel(handle))
    }

    fn begin(&self, call: Call) -> Result<BackendHandle, RawError> {
        if let Some(error) = &self.refuse {
            return Err(error.clone());
        }
        self.calls.lock().unwrap().push(call);
        Ok(BackendHandle::new(self.next.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

impl TransferBackend for RecordingBackend {
    fn provider(&self) -> &'static str {
        "recording"
    }

    fn begin_upload(
        &self,
        path: &ResourcePath,
        payload: Arc<[u8]>,
        content_type: &str,
    ) -> Result<BackendHandle, RawError> {
        self.begin(Call::BeginUpload {
            path: path.to_string(),
            len: payload.len(),
            content_type: content_type.to_string(),
        })
    }

    fn begin_download(&self, path: &ResourcePath, destination: &Path) -> Result<BackendHandle, RawError> {
        self.begin(Call::BeginDownload {
            path: path.to_string(),
            destination: destination.display().to_string(),
        })
    }

    fn pause(&self, handle: BackendHandle) {
        self.calls.lock().unwrap().push(Call::Pause(handle));
    }

    fn resume(&self, handle: BackendHandle) {
        self.calls.lock().unwrap().push(Call::Resume(handle));
    }

    fn cancel(&self, handle: BackendHandle) {
        self.calls.lock().unwrap().push(Call::Cancel(handle));
    }
}

/// How one scripted attempt ends.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Succeed(u64),
    Fail(RawError),
}

/// Plays back one [`Outcome`] per `begin_*` call through the event channel.
///
/// Once the script runs out every further attempt succeeds.
pub(crate) struct ScriptedBackend {
    next: AtomicU64,
    begins: AtomicU32,
    events: EventSender,
    script: Mutex<VecDeque<Outcome>>,
}

impl ScriptedBackend {
    /// Must be called inside a tokio runtime; spawns the event router.
    pub(crate) fn client(script: Vec<Outcome>) -> (TransferClient, Arc<ScriptedBackend>) {
        let (events, rx) = event_channel();
        let backend = Arc::new(ScriptedBackend {
            next: AtomicU64::new(0),
            begins: AtomicU32::new(0),
            events,
            script: Mutex::new(script.into()),
        });
        let client = TransferClient::new(backend.clone());
        let router = client.clone();
        tokio::spawn(async move { router.route_events(rx).await });
        (client, backend)
    }

    pub(crate) fn begins(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }

    fn play(&self, len: u64) -> Result<BackendHandle, RawError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        let handle = BackendHandle::new(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Succeed(len));
        let events = match outcome {
            Outcome::Succeed(total) => vec![
                BackendEvent::progress(handle, total / 2, Some(total)),
                BackendEvent::progress(handle, total, Some(total)),
                BackendEvent::succeeded(handle),
            ],
            Outcome::Fail(error) => vec![
                BackendEvent::progress(handle, len / 2, Some(len)),
                BackendEvent::failed(handle, error.code, error.message),
            ],
        };
        for event in events {
            let _ = self.events.send(event);
        }
        Ok(handle)
    }
}

impl TransferBackend for ScriptedBackend {
    fn provider(&self) -> &'static str {
        "scripted"
    }

    fn begin_upload(
        &self,
        _path: &ResourcePath,
        payload: Arc<[u8]>,
        _content_type: &str,
    ) -> Result<BackendHandle, RawError> {
        self.play(payload.len() as u64)
    }

    fn begin_download(&self, _path: &ResourcePath, _destination: &Path) -> Result<BackendHandle, RawError> {
        self.play(100)
    }

    fn pause(&self, _handle: BackendHandle) {}

    fn resume(&self, _handle: BackendHandle) {}

    fn cancel(&self, _handle: BackendHandle) {}
}

/// Collects every event a task delivers, across all kinds.
#[derive(Clone, Default)]
pub(crate) struct EventLog {
    events: Arc<Mutex<Vec<TransferEvent>>>,
}

impl EventLog {
    pub(crate) fn attach(task: &TransferTask) -> Self {
        let log = Self::default();
        for kind in [
            EventKind::Progress,
            EventKind::Paused,
            EventKind::Resumed,
            EventKind::Succeeded,
            EventKind::Failed,
        ] {
            let events = Arc::clone(&log.events);
            task.add_observer(kind, move |event| events.lock().unwrap().push(event.clone()));
        }
        log
    }

    pub(crate) fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().unwrap().clone()
    }
}
