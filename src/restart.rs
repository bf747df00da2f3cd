// src/restart.rs

//! Restart controller: user-driven recovery of failed or stuck work.
//!
//! The core never retries on its own. A restart creates a new task with the
//! same dedup key and `attempt = latest.attempt + 1`, and sends it through
//! the dispatcher's enqueue path. The old task stays in the ledger as
//! history.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::dispatch::Dispatcher;
use crate::errors::{MemtaskError, Result};
use crate::exec::CancelRegistry;
use crate::ledger::{Task, TaskHandle, TaskLedger, TaskState};
use crate::types::{DedupKey, TaskId};

/// What a restart request points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartTarget {
    Task(TaskId),
    /// The latest attempt for this dedup key.
    Key(DedupKey),
}

impl fmt::Display for RestartTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartTarget::Task(id) => write!(f, "task {id}"),
            RestartTarget::Key(key) => write!(f, "dedup key {key}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartMode {
    /// Only terminal (Failed) work may be restarted.
    #[default]
    Normal,
    /// An active latest attempt is first marked Failed ("restarted by
    /// user") and its worker is cancelled.
    KillAndRestart,
}

/// What the ledger should do for an accepted restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Readmit,
    KillThenReadmit,
}

/// Decide whether `latest` (the newest attempt for the key of `targeted`)
/// may be restarted.
pub fn decide(
    latest: &Task,
    targeted: &Task,
    mode: RestartMode,
    max_attempts: Option<u32>,
) -> Result<RestartDecision> {
    let next_attempt = latest.attempt + 1;
    if let Some(max) = max_attempts {
        if next_attempt > max {
            return Err(MemtaskError::AttemptsExhausted {
                attempt: next_attempt,
                max,
            });
        }
    }

    match (latest.state, mode) {
        (TaskState::Failed, _) => Ok(RestartDecision::Readmit),
        (TaskState::Pending | TaskState::Running, RestartMode::KillAndRestart) => {
            Ok(RestartDecision::KillThenReadmit)
        }
        (TaskState::Pending | TaskState::Running, RestartMode::Normal) => {
            Err(MemtaskError::invalid_state(
                targeted.id,
                format!(
                    "attempt {} (task {}) is still {}; wait for it or kill and restart",
                    latest.attempt, latest.id, latest.state
                ),
            ))
        }
        (TaskState::Succeeded, _) => Err(MemtaskError::invalid_state(
            targeted.id,
            format!("attempt {} (task {}) already succeeded", latest.attempt, latest.id),
        )),
    }
}

pub struct RestartController {
    ledger: Arc<TaskLedger>,
    dispatcher: Arc<Dispatcher>,
    cancels: Arc<CancelRegistry>,
    max_attempts: Option<u32>,
}

impl RestartController {
    pub fn new(
        ledger: Arc<TaskLedger>,
        dispatcher: Arc<Dispatcher>,
        cancels: Arc<CancelRegistry>,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            cancels,
            max_attempts,
        }
    }

    pub fn restart(&self, target: &RestartTarget, mode: RestartMode) -> Result<TaskHandle> {
        let max_attempts = self.max_attempts;
        let readmission = self.ledger.readmit(
            target,
            Utc::now(),
            |latest, targeted| decide(latest, targeted, mode, max_attempts),
            |id| self.dispatcher.enqueue(id),
        )?;

        if let Some(killed) = readmission.killed {
            let signalled = self.cancels.cancel(killed);
            info!(
                task_id = %killed,
                worker_signalled = signalled,
                "killed active attempt for restart"
            );
        }

        info!(
            task_id = %readmission.task.id,
            previous = %readmission.previous,
            attempt = readmission.task.attempt,
            plugin = %readmission.task.plugin,
            evidence_id = readmission.task.evidence_id,
            "task restarted"
        );

        Ok(readmission.task.handle(false))
    }
}
