// src/ledger/task.rs

//! Task record and its lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artefacts::ResultRef;
use crate::types::{DedupKey, EvidenceId, Parameters, TaskId, WorkerId};

/// Lifecycle state of a task.
///
/// ```text
/// Pending ──> Running ──> Succeeded
///    │           │
///    └───────────┴──────> Failed
/// ```
///
/// `Succeeded` and `Failed` are terminal: nothing ever leaves them. A
/// restart creates a *new* task instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    /// Pending or Running; at most one such task exists per dedup key.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Pending, TaskState::Running)
                | (TaskState::Pending, TaskState::Failed)
                | (TaskState::Running, TaskState::Succeeded)
                | (TaskState::Running, TaskState::Failed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a task ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The plugin ran and reported a failure.
    ExecutionFailure,
    /// Deadline exceeded, crash detected, or killed by a restart.
    Aborted,
}

/// Generic message recorded for tasks whose worker vanished.
pub const ABORTED_MESSAGE: &str = "aborted";
pub const DEADLINE_MESSAGE: &str = "deadline exceeded";
pub const RESTARTED_MESSAGE: &str = "restarted by user";

/// One scheduled execution of a plugin against evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub evidence_id: EvidenceId,
    pub plugin: String,
    pub parameters: Parameters,
    pub dedup_key: DedupKey,
    pub state: TaskState,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub failure: Option<FailureKind>,
    #[serde(default)]
    pub result_ref: Option<ResultRef>,
    /// Worker currently executing the task (Running only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerId>,
}

impl Task {
    pub fn handle(&self, deduplicated: bool) -> TaskHandle {
        TaskHandle {
            id: self.id,
            state: self.state,
            attempt: self.attempt,
            dedup_key: self.dedup_key.clone(),
            deduplicated,
        }
    }
}

/// What a submit or restart returns to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskHandle {
    pub id: TaskId,
    pub state: TaskState,
    pub attempt: u32,
    pub dedup_key: DedupKey,
    /// True when the submission joined an already active task.
    pub deduplicated: bool,
}

/// Admission request assembled by the dispatcher.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub evidence_id: EvidenceId,
    pub plugin: String,
    pub parameters: Parameters,
    pub dedup_key: DedupKey,
}
