// src/dispatch/mod.rs

//! Dispatcher: validates, deduplicates and enqueues task submissions.
//!
//! Submission runs on the caller's thread of control and never waits for a
//! plugin: the only work done here is validation, one ledger write and a
//! non-blocking send on the unbounded work queue.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::{MemtaskError, Result};
use crate::evidence::EvidenceCatalog;
use crate::ledger::{Admission, NewTask, TaskHandle, TaskLedger};
use crate::plugins::PluginRegistry;
use crate::types::{DedupKey, EvidenceId, Parameters, TaskId};

/// Sending half of the work queue. Workers share the receiving half.
pub type WorkQueueTx = mpsc::UnboundedSender<TaskId>;
pub type WorkQueueRx = mpsc::UnboundedReceiver<TaskId>;

pub fn work_queue() -> (WorkQueueTx, WorkQueueRx) {
    mpsc::unbounded_channel()
}

pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    evidence: Arc<dyn EvidenceCatalog>,
    ledger: Arc<TaskLedger>,
    queue: WorkQueueTx,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<PluginRegistry>,
        evidence: Arc<dyn EvidenceCatalog>,
        ledger: Arc<TaskLedger>,
        queue: WorkQueueTx,
    ) -> Self {
        Self {
            registry,
            evidence,
            ledger,
            queue,
        }
    }

    /// Submit a plugin run.
    ///
    /// Returns the handle of the existing task when the same work (same
    /// dedup key) is already Pending or Running.
    pub fn submit(
        &self,
        evidence_id: EvidenceId,
        plugin_name: &str,
        parameters: &Parameters,
    ) -> Result<TaskHandle> {
        let plugin = self.registry.require(plugin_name)?;

        if !self.evidence.contains(evidence_id) {
            return Err(MemtaskError::evidence_not_found(evidence_id));
        }

        let parameters = plugin.validate_parameters(parameters)?;
        let dedup_key = DedupKey::compute(evidence_id, plugin.name(), &parameters);

        let request = NewTask {
            evidence_id,
            plugin: plugin.name().to_string(),
            parameters,
            dedup_key,
        };

        let admission = self
            .ledger
            .admit(request, Utc::now(), |id| self.enqueue(id))?;

        match &admission {
            Admission::Created(task) => info!(
                task_id = %task.id,
                evidence_id,
                plugin = plugin_name,
                attempt = task.attempt,
                "task admitted"
            ),
            Admission::Joined(task) => debug!(
                task_id = %task.id,
                evidence_id,
                plugin = plugin_name,
                state = %task.state,
                "duplicate submission joined active task"
            ),
        }

        Ok(admission.handle())
    }

    /// Put an admitted task on the work queue.
    pub fn enqueue(&self, id: TaskId) -> Result<()> {
        self.queue.send(id).map_err(|_| MemtaskError::ShuttingDown)
    }
}
