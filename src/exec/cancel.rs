// src/exec/cancel.rs

//! Per-task cancellation handles for running plugin invocations.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use crate::types::{TaskId, WorkerId, lock};

/// Maps running tasks to the cancel sender of the worker executing them.
///
/// Used by "kill and restart": the restart controller marks the task Failed
/// in the ledger and then fires the cancel so the worker stops the plugin.
/// Workers register before claiming a task, so a claimed task always has
/// an entry until its invocation ends.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    senders: Mutex<HashMap<TaskId, oneshot::Sender<()>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_id: TaskId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        lock(&self.senders).insert(task_id, tx);
        rx
    }

    pub fn remove(&self, task_id: TaskId) {
        lock(&self.senders).remove(&task_id);
    }

    /// Signal the worker running `task_id`. Returns false when no worker
    /// holds the task.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let Some(tx) = lock(&self.senders).remove(&task_id) else {
            return false;
        };
        let delivered = tx.send(()).is_ok();
        debug!(task_id = %task_id, delivered, "cancellation signalled");
        delivered
    }
}

/// Set of workers that are currently alive. The reconciliation sweep only
/// reaps Running tasks whose owning worker is not in this set.
#[derive(Debug, Default)]
pub struct LiveWorkers {
    ids: Mutex<HashSet<WorkerId>>,
}

impl LiveWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` alive until the returned guard is dropped (including when
    /// the worker unwinds from a panic).
    pub fn enter(&self, id: WorkerId) -> LiveGuard<'_> {
        lock(&self.ids).insert(id);
        LiveGuard { live: self, id }
    }

    pub fn snapshot(&self) -> HashSet<WorkerId> {
        lock(&self.ids).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.ids).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct LiveGuard<'a> {
    live: &'a LiveWorkers,
    id: WorkerId,
}

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        lock(&self.live.ids).remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_reaches_registered_receiver_once() {
        let registry = CancelRegistry::new();
        let rx = registry.register(TaskId(5));

        assert!(registry.cancel(TaskId(5)));
        assert!(rx.await.is_ok());
        assert!(!registry.cancel(TaskId(5)));
    }

    #[test]
    fn live_guard_removes_worker_on_drop() {
        let live = LiveWorkers::new();
        {
            let _guard = live.enter(3);
            assert!(live.snapshot().contains(&3));
        }
        assert!(live.is_empty());
    }
}
