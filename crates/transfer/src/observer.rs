//! Ordered observer registrations, one list shared by all event kinds.

use std::sync::Arc;

use crate::{ProgressSnapshot, TransferError};

/// Kind of event an observer subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    Paused,
    Resumed,
    Succeeded,
    Failed,
}

/// Event delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress(ProgressSnapshot),
    Paused,
    Resumed,
    Succeeded,
    Failed(TransferError),
}

impl TransferEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransferEvent::Progress(_) => EventKind::Progress,
            TransferEvent::Paused => EventKind::Paused,
            TransferEvent::Resumed => EventKind::Resumed,
            TransferEvent::Succeeded => EventKind::Succeeded,
            TransferEvent::Failed(_) => EventKind::Failed,
        }
    }
}

/// Callback invoked with each event of the subscribed kind.
pub type Observer = Arc<dyn Fn(&TransferEvent) + Send + Sync>;

/// Identifies one registration; pass it to `remove_observer` to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle {
    id: u64,
    kind: EventKind,
}

impl ObserverHandle {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

struct Registration {
    id: u64,
    kind: EventKind,
    callback: Observer,
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    registrations: Vec<Registration>,
    next_id: u64,
}

impl ObserverRegistry {
    pub(crate) fn add(&mut self, kind: EventKind, callback: Observer) -> ObserverHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.registrations.push(Registration { id, kind, callback });
        ObserverHandle { id, kind }
    }

    /// Returns `false` if the handle was already removed.
    pub(crate) fn remove(&mut self, handle: ObserverHandle) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != handle.id);
        self.registrations.len() != before
    }

    /// Callbacks for `kind`, in registration order.
    pub(crate) fn matching(&self, kind: EventKind) -> Vec<Observer> {
        self.registrations
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| Arc::clone(&r.callback))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.registrations.len()
    }
}
