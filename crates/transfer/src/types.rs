use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ResourcePath;

/// Which way the bytes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}

/// Lifecycle state of a transfer task.
///
/// `Pending -> Running <-> Paused -> {Succeeded | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, not yet started.
    Pending,
    Running,
    Paused,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Returns `true` once no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Returns `true` while a backend operation may still be producing events.
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Running | TaskState::Paused)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Paused => "paused",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Unique identifier of a task, used for log correlation and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// What the backend is asked to do when the task starts.
#[derive(Debug, Clone)]
pub enum TransferRequest {
    /// Store `payload` under the task's resource path.
    Upload {
        payload: Arc<[u8]>,
        content_type: String,
    },
    /// Fetch the object into a local file.
    Download { destination: PathBuf },
}

impl TransferRequest {
    pub fn direction(&self) -> Direction {
        match self {
            TransferRequest::Upload { .. } => Direction::Upload,
            TransferRequest::Download { .. } => Direction::Download,
        }
    }
}

/// Point-in-time summary of a task, suitable for printing or serializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub id: TaskId,
    pub direction: Direction,
    pub resource_path: ResourcePath,
    pub state: TaskState,
    pub bytes_transferred: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Paused.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn active_states() {
        assert!(TaskState::Running.is_active());
        assert!(TaskState::Paused.is_active());
        assert!(!TaskState::Pending.is_active());
        assert!(!TaskState::Succeeded.is_active());
    }

    #[test]
    fn task_state_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskState::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&TaskState::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!(TaskState::Paused.to_string(), "paused");
    }

    #[test]
    fn request_direction() {
        let up = TransferRequest::Upload {
            payload: Arc::from(&b"abc"[..]),
            content_type: "image/jpeg".into(),
        };
        let down = TransferRequest::Download {
            destination: PathBuf::from("/tmp/out.jpg"),
        };
        assert_eq!(up.direction(), Direction::Upload);
        assert_eq!(down.direction(), Direction::Download);
        assert_eq!(Direction::Download.to_string(), "download");
    }

    #[test]
    fn report_skips_absent_fields() {
        let report = TaskReport {
            id: TaskId::new(),
            direction: Direction::Upload,
            resource_path: "images/nature.jpg".parse().unwrap(),
            state: TaskState::Pending,
            bytes_transferred: 0,
            total_bytes: None,
            percent_complete: None,
            error: None,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"resourcePath\":\"images/nature.jpg\""));
        assert!(!json.contains("totalBytes"));
        assert!(!json.contains("error"));
        let parsed: TaskReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
