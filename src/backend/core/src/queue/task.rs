//! Task definitions.
//!
//! - **TaskId**: unique identifier assigned at enqueue time
//! - **TaskType**: closed set of work kinds, each served by one handler
//! - **TaskStatus**: the task state machine
//! - **QueueTask**: the task record kept by the queue for status lookups

use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ErrorCode, TransflowError};

// ═══════════════════════════════════════════════════════════════════════════════
// Task Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for TaskId {
    type Err = TransflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| TransflowError::task_not_found(s))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Task Type
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of work a task carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Translation,
    Review,
    Validation,
    QualityCheck,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        Self::Translation,
        Self::Review,
        Self::Validation,
        Self::QualityCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Translation => "translation",
            Self::Review => "review",
            Self::Validation => "validation",
            Self::QualityCheck => "quality_check",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = TransflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                TransflowError::new(ErrorCode::InvalidConfiguration, format!("Unknown task type: {}", s))
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Task Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Task lifecycle.
///
/// ```text
/// PENDING ──▶ PROCESSING ──▶ COMPLETED
///    ▲  │          │  └────▶ FAILED      (retries exhausted)
///    │  │          └───────▶ PENDING     (after retry delay)
///    │  └─────────────────▶ CANCELLED
///    └── PROCESSING ──────▶ CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queue Task
// ═══════════════════════════════════════════════════════════════════════════════

/// A task and its execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTask {
    pub id: TaskId,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// Higher runs first
    pub priority: i32,

    pub status: TaskStatus,

    /// Handler input
    pub payload: serde_json::Value,

    /// Failed attempts so far
    pub retry_count: u32,

    /// Last failure message
    pub error: Option<String>,

    /// Handler output of the successful attempt
    #[serde(default)]
    pub result: Option<serde_json::Value>,

    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, with = "ts_milliseconds_option")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, with = "ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Wall time of the final attempt
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl QueueTask {
    pub(crate) fn new(task_type: TaskType, priority: i32, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            task_type,
            priority,
            status: TaskStatus::Pending,
            payload,
            retry_count: 0,
            error: None,
            result: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub(crate) fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub(crate) fn start(&mut self) {
        let now = Utc::now();
        self.status = TaskStatus::Processing;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub(crate) fn finish(&mut self, status: TaskStatus, duration_ms: u64) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.updated_at = now;
        self.duration_ms = Some(duration_ms);
    }

    pub(crate) fn cancel(&mut self) {
        let now = Utc::now();
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// When the task reached a terminal state.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        if self.status.is_terminal() {
            Some(self.completed_at.unwrap_or(self.updated_at))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::new();
        assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);

        let err = "not-a-uuid".parse::<TaskId>().unwrap_err();
        assert_eq!(err.code(), ErrorCode::TaskNotFound);
        assert!(err.to_string().contains("not-a-uuid"));
    }

    #[test]
    fn test_task_type_parse() {
        assert_eq!("quality_check".parse::<TaskType>().unwrap(), TaskType::QualityCheck);
        assert_eq!("TRANSLATION".parse::<TaskType>().unwrap(), TaskType::Translation);
        assert!("summarize".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_task() {
        let task = QueueTask::new(TaskType::Review, 3, json!({"doc": 1}));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.created_at, task.updated_at);
        assert!(task.started_at.is_none());
        assert!(task.error.is_none());
    }

    #[test]
    fn test_task_serialization() {
        let mut task = QueueTask::new(TaskType::QualityCheck, 1, json!(null));
        task.start();

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "quality_check");
        assert_eq!(json["status"], "PROCESSING");
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["createdAt"], json!(task.created_at.timestamp_millis()));
        assert_eq!(json["completedAt"], json!(null));

        let back: QueueTask = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.status, TaskStatus::Processing);
        assert_eq!(
            back.started_at.map(|t| t.timestamp_millis()),
            task.started_at.map(|t| t.timestamp_millis())
        );
    }
}
