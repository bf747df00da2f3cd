// src/ledger/mod.rs

//! Task ledger: the single source of truth for task state.
//!
//! All admission decisions and state transitions go through one mutex, so
//! the "at most one active task per dedup key" invariant holds even when
//! many callers submit the same work at once. The lock is only held for
//! bookkeeping (and the in-memory artefact commit on success); plugin
//! execution never happens under it.
//!
//! Every mutation wakes [`TaskLedger::wait_for_terminal`] callers through a
//! `tokio::sync::Notify`.

pub mod task;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::artefacts::ResultRef;
use crate::errors::{MemtaskError, Result};
use crate::restart::{RestartDecision, RestartTarget};
use crate::types::{DedupKey, EvidenceId, TaskId, WorkerId, lock};

pub use task::{
    ABORTED_MESSAGE, DEADLINE_MESSAGE, FailureKind, NewTask, RESTARTED_MESSAGE, Task, TaskHandle,
    TaskState,
};

/// Outcome of [`TaskLedger::admit`].
#[derive(Debug, Clone)]
pub enum Admission {
    /// A new Pending task was created and enqueued.
    Created(Task),
    /// An active task with the same dedup key already existed.
    Joined(Task),
}

impl Admission {
    pub fn task(&self) -> &Task {
        match self {
            Admission::Created(t) | Admission::Joined(t) => t,
        }
    }

    pub fn handle(&self) -> TaskHandle {
        match self {
            Admission::Created(t) => t.handle(false),
            Admission::Joined(t) => t.handle(true),
        }
    }
}

/// Outcome of [`TaskLedger::readmit`].
#[derive(Debug, Clone)]
pub struct Readmission {
    pub task: Task,
    /// Latest attempt before the restart.
    pub previous: TaskId,
    /// Set when the previous attempt was still active and got killed.
    pub killed: Option<TaskId>,
}

#[derive(Debug, Default)]
struct LedgerState {
    tasks: BTreeMap<TaskId, Task>,
    /// Dedup key -> the one Pending/Running task for it.
    active: HashMap<DedupKey, TaskId>,
    /// Dedup key -> all tasks for it, ascending by attempt.
    history: HashMap<DedupKey, Vec<TaskId>>,
    next_id: u64,
}

impl LedgerState {
    fn issue_id(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId(self.next_id)
    }

    fn next_attempt(&self, key: &DedupKey) -> u32 {
        self.latest_for_key(key).map_or(1, |t| t.attempt + 1)
    }

    fn latest_for_key(&self, key: &DedupKey) -> Option<&Task> {
        self.history
            .get(key)
            .and_then(|ids| ids.last())
            .and_then(|id| self.tasks.get(id))
    }

    fn insert(&mut self, task: Task) {
        if task.state.is_active() {
            self.active.insert(task.dedup_key.clone(), task.id);
        }
        self.history
            .entry(task.dedup_key.clone())
            .or_default()
            .push(task.id);
        self.tasks.insert(task.id, task);
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| MemtaskError::task_not_found(id))
    }

    fn transition(&mut self, id: TaskId, next: TaskState) -> Result<&mut Task> {
        let task = self.task_mut(id)?;
        if !task.state.can_transition_to(next) {
            return Err(MemtaskError::invalid_state(
                id,
                format!("cannot move from {} to {next}", task.state),
            ));
        }
        task.state = next;
        Ok(task)
    }

    fn mark_failed(
        &mut self,
        id: TaskId,
        kind: FailureKind,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let task = self.transition(id, TaskState::Failed)?;
        task.finished_at = Some(now);
        task.failure = Some(kind);
        task.error_message = Some(message.to_string());
        task.worker = None;
        let task = task.clone();
        self.active.remove(&task.dedup_key);
        Ok(task)
    }
}

/// Authoritative record of every task instance.
#[derive(Debug, Default)]
pub struct TaskLedger {
    state: Mutex<LedgerState>,
    changed: Notify,
}

impl TaskLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from snapshot tasks. Ids keep increasing past the
    /// highest restored id.
    pub fn restore(mut tasks: Vec<Task>) -> Self {
        tasks.sort_by_key(|t| (t.attempt, t.id));
        let mut state = LedgerState::default();
        for task in tasks {
            state.next_id = state.next_id.max(task.id.0);
            state.insert(task);
        }
        Self {
            state: Mutex::new(state),
            changed: Notify::new(),
        }
    }

    /// Admit a new task unless an active one with the same dedup key exists.
    ///
    /// `enqueue` runs under the ledger lock before the task becomes visible;
    /// if it fails nothing is recorded.
    pub fn admit<F>(&self, request: NewTask, now: DateTime<Utc>, enqueue: F) -> Result<Admission>
    where
        F: FnOnce(TaskId) -> Result<()>,
    {
        let mut state = lock(&self.state);

        if let Some(existing) = state
            .active
            .get(&request.dedup_key)
            .and_then(|id| state.tasks.get(id))
        {
            return Ok(Admission::Joined(existing.clone()));
        }

        let attempt = state.next_attempt(&request.dedup_key);
        let id = state.issue_id();
        enqueue(id)?;

        let task = Task {
            id,
            evidence_id: request.evidence_id,
            plugin: request.plugin,
            parameters: request.parameters,
            dedup_key: request.dedup_key,
            state: TaskState::Pending,
            attempt,
            created_at: now,
            started_at: None,
            finished_at: None,
            error_message: None,
            failure: None,
            result_ref: None,
            worker: None,
        };
        state.insert(task.clone());
        drop(state);

        self.changed.notify_waiters();
        Ok(Admission::Created(task))
    }

    /// Create the next attempt for the target's dedup key.
    ///
    /// `decide` sees the latest attempt for the key and the targeted task and
    /// either refuses or says whether the latest attempt must be killed
    /// first. Everything happens under one lock, so two concurrent restarts
    /// cannot both create an attempt.
    pub fn readmit<D, F>(
        &self,
        target: &RestartTarget,
        now: DateTime<Utc>,
        decide: D,
        enqueue: F,
    ) -> Result<Readmission>
    where
        D: FnOnce(&Task, &Task) -> Result<RestartDecision>,
        F: FnOnce(TaskId) -> Result<()>,
    {
        let mut state = lock(&self.state);

        let targeted = match target {
            RestartTarget::Task(id) => state.tasks.get(id),
            RestartTarget::Key(key) => state.latest_for_key(key),
        }
        .cloned()
        .ok_or_else(|| MemtaskError::NotFound(format!("restart target {target}")))?;

        let latest = state
            .latest_for_key(&targeted.dedup_key)
            .cloned()
            .ok_or_else(|| MemtaskError::task_not_found(targeted.id))?;

        let decision = decide(&latest, &targeted)?;

        let id = state.issue_id();
        enqueue(id)?;

        let killed = match decision {
            RestartDecision::Readmit => None,
            RestartDecision::KillThenReadmit => {
                state.mark_failed(latest.id, FailureKind::Aborted, RESTARTED_MESSAGE, now)?;
                Some(latest.id)
            }
        };

        let task = Task {
            id,
            evidence_id: latest.evidence_id,
            plugin: latest.plugin.clone(),
            parameters: latest.parameters.clone(),
            dedup_key: latest.dedup_key.clone(),
            state: TaskState::Pending,
            attempt: latest.attempt + 1,
            created_at: now,
            started_at: None,
            finished_at: None,
            error_message: None,
            failure: None,
            result_ref: None,
            worker: None,
        };
        state.insert(task.clone());
        drop(state);

        self.changed.notify_waiters();
        Ok(Readmission {
            task,
            previous: latest.id,
            killed,
        })
    }

    /// Pending -> Running, claimed by `worker`.
    pub fn start(&self, id: TaskId, worker: WorkerId, now: DateTime<Utc>) -> Result<Task> {
        let mut state = lock(&self.state);
        let task = state.transition(id, TaskState::Running)?;
        task.started_at = Some(now);
        task.worker = Some(worker);
        let task = task.clone();
        drop(state);

        self.changed.notify_waiters();
        Ok(task)
    }

    /// Running -> Succeeded.
    ///
    /// `commit` persists the task's artefacts and runs under the ledger lock
    /// after the state check, so a reader that observes `Succeeded` always
    /// sees the complete artefacts, and a task that was killed or reaped in
    /// the meantime never gets artefacts committed.
    pub fn succeed<C>(&self, id: TaskId, now: DateTime<Utc>, commit: C) -> Result<Task>
    where
        C: FnOnce(&Task) -> Result<ResultRef>,
    {
        let mut state = lock(&self.state);

        let current = state.task_mut(id)?;
        if current.state != TaskState::Running {
            return Err(MemtaskError::invalid_state(
                id,
                format!("cannot complete a {} task", current.state),
            ));
        }
        let result_ref = commit(current)?;

        let task = state.transition(id, TaskState::Succeeded)?;
        task.finished_at = Some(now);
        task.result_ref = Some(result_ref);
        task.worker = None;
        let task = task.clone();
        state.active.remove(&task.dedup_key);
        drop(state);

        self.changed.notify_waiters();
        Ok(task)
    }

    /// Pending/Running -> Failed.
    pub fn fail(
        &self,
        id: TaskId,
        kind: FailureKind,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let mut state = lock(&self.state);
        let task = state.mark_failed(id, kind, message, now)?;
        drop(state);

        self.changed.notify_waiters();
        Ok(task)
    }

    /// Mark Running tasks whose deadline passed and whose worker is no
    /// longer alive as Failed/Aborted.
    pub fn reap_stuck(
        &self,
        now: DateTime<Utc>,
        deadline: chrono::Duration,
        live_workers: &HashSet<WorkerId>,
    ) -> Vec<TaskId> {
        let mut state = lock(&self.state);

        let stuck: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Running)
            .filter(|t| t.started_at.is_some_and(|started| started + deadline <= now))
            .filter(|t| !t.worker.is_some_and(|w| live_workers.contains(&w)))
            .map(|t| t.id)
            .collect();

        for id in &stuck {
            if let Err(e) = state.mark_failed(*id, FailureKind::Aborted, ABORTED_MESSAGE, now) {
                warn!(task_id = %id, error = %e, "failed to reap stuck task");
            } else {
                warn!(task_id = %id, "reaped stuck task with no live worker");
            }
        }
        drop(state);

        if !stuck.is_empty() {
            self.changed.notify_waiters();
        }
        stuck
    }

    /// Crash-recovery scan after restoring a snapshot.
    ///
    /// Running tasks lost their worker with the previous process and become
    /// Failed/Aborted. Returns the Pending tasks, which the caller
    /// re-enqueues.
    pub fn recover(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut state = lock(&self.state);

        let running: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Running)
            .map(|t| t.id)
            .collect();
        for id in running {
            if state
                .mark_failed(id, FailureKind::Aborted, ABORTED_MESSAGE, now)
                .is_ok()
            {
                info!(task_id = %id, "recovery scan: running task marked aborted");
            }
        }

        let pending: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Pending)
            .map(|t| t.id)
            .collect();
        drop(state);

        self.changed.notify_waiters();
        debug!(pending = pending.len(), "recovery scan complete");
        pending
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        lock(&self.state).tasks.get(&id).cloned()
    }

    /// Latest attempt for a dedup key.
    pub fn latest_for_key(&self, key: &DedupKey) -> Option<Task> {
        lock(&self.state).latest_for_key(key).cloned()
    }

    /// All attempts for a dedup key, oldest first.
    pub fn history(&self, key: &DedupKey) -> Vec<Task> {
        let state = lock(&self.state);
        state
            .history
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect()
    }

    /// All tasks for one evidence item, newest first.
    pub fn list_for_evidence(&self, evidence_id: EvidenceId) -> Vec<Task> {
        let state = lock(&self.state);
        state
            .tasks
            .values()
            .rev()
            .filter(|t| t.evidence_id == evidence_id)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Task> {
        lock(&self.state).tasks.values().cloned().collect()
    }

    /// Snapshot the tasks and run `with` under the same lock.
    ///
    /// Artefact commits also happen under this lock, so an artefact
    /// snapshot taken in `with` matches the task states exactly.
    pub fn snapshot_with<R>(&self, with: impl FnOnce() -> R) -> (Vec<Task>, R) {
        let state = lock(&self.state);
        let tasks = state.tasks.values().cloned().collect();
        let extra = with();
        drop(state);
        (tasks, extra)
    }

    /// Resolve once the task reaches a terminal state.
    pub async fn wait_for_terminal(&self, id: TaskId) -> Result<Task> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a transition in between is not missed.
            notified.as_mut().enable();

            match self.get(id) {
                None => return Err(MemtaskError::task_not_found(id)),
                Some(task) if task.state.is_terminal() => return Ok(task),
                Some(_) => {}
            }

            notified.await;
        }
    }
}
