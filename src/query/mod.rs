// src/query/mod.rs

//! Read side: plugin availability, artefacts, timelines, task history and
//! the enriched process view.
//!
//! Nothing here mutates state or waits on a plugin.

pub mod enrich;
pub mod timeline;

use std::sync::Arc;

use serde::Serialize;

use crate::artefacts::{ArtefactRecord, ArtefactStore};
use crate::errors::{MemtaskError, Result};
use crate::evidence::EvidenceCatalog;
use crate::ledger::{Task, TaskLedger, TaskState};
use crate::plugins::{PluginDescriptor, PluginKind, PluginRegistry};
use crate::types::{EvidenceId, TaskId};

pub use enrich::EnrichedProcess;
pub use timeline::{TimelineEntry, build_timeline, parse_timestamp};

/// A registry entry annotated with what already exists for one evidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginAvailability {
    pub descriptor: PluginDescriptor,
    pub task_count: usize,
    /// State of the newest task for this (evidence, plugin) pair.
    pub latest_state: Option<TaskState>,
    pub has_artefacts: bool,
}

pub struct QueryFacade {
    registry: Arc<PluginRegistry>,
    ledger: Arc<TaskLedger>,
    store: Arc<dyn ArtefactStore>,
    evidence: Arc<dyn EvidenceCatalog>,
}

impl QueryFacade {
    pub fn new(
        registry: Arc<PluginRegistry>,
        ledger: Arc<TaskLedger>,
        store: Arc<dyn ArtefactStore>,
        evidence: Arc<dyn EvidenceCatalog>,
    ) -> Self {
        Self {
            registry,
            ledger,
            store,
            evidence,
        }
    }

    fn require_evidence(&self, evidence_id: EvidenceId) -> Result<()> {
        if self.evidence.contains(evidence_id) {
            Ok(())
        } else {
            Err(MemtaskError::evidence_not_found(evidence_id))
        }
    }

    pub fn list_plugins(&self, evidence_id: EvidenceId) -> Result<Vec<PluginAvailability>> {
        self.require_evidence(evidence_id)?;
        let tasks = self.ledger.list_for_evidence(evidence_id);

        Ok(self
            .registry
            .iter()
            .map(|plugin| {
                let mut own = tasks.iter().filter(|t| t.plugin == plugin.name());
                // Tasks are newest first.
                let latest_state = own.next().map(|t| t.state);
                let task_count = own.count() + usize::from(latest_state.is_some());
                PluginAvailability {
                    descriptor: plugin.descriptor().clone(),
                    task_count,
                    latest_state,
                    has_artefacts: self.store.count(evidence_id, plugin.name()) > 0,
                }
            })
            .collect())
    }

    /// Records for the pair in creation order; empty until a task succeeds.
    pub fn list_artefacts(
        &self,
        evidence_id: EvidenceId,
        plugin_name: &str,
    ) -> Result<Vec<ArtefactRecord>> {
        let plugin = self.registry.require(plugin_name)?;
        self.require_evidence(evidence_id)?;
        Ok(self.store.list(evidence_id, plugin.name()))
    }

    pub fn list_timeline_artefacts(
        &self,
        evidence_id: EvidenceId,
        plugin_name: &str,
    ) -> Result<Vec<TimelineEntry>> {
        let plugin = self.registry.require(plugin_name)?;
        if plugin.descriptor().kind != PluginKind::Timeline {
            return Err(MemtaskError::WrongPluginKind {
                plugin: plugin_name.to_string(),
                expected: PluginKind::Timeline.to_string(),
            });
        }
        self.require_evidence(evidence_id)?;
        Ok(build_timeline(self.store.list(evidence_id, plugin.name())))
    }

    /// All tasks for the evidence, newest first.
    pub fn list_tasks(&self, evidence_id: EvidenceId) -> Result<Vec<Task>> {
        self.require_evidence(evidence_id)?;
        Ok(self.ledger.list_for_evidence(evidence_id))
    }

    pub fn get_task(&self, task_id: TaskId) -> Result<Task> {
        self.ledger
            .get(task_id)
            .ok_or_else(|| MemtaskError::task_not_found(task_id))
    }

    /// Join every pid-bearing plugin's records for `pid`.
    pub fn enriched_process(&self, evidence_id: EvidenceId, pid: u32) -> Result<EnrichedProcess> {
        self.require_evidence(evidence_id)?;

        let mut view = EnrichedProcess::new(evidence_id, pid);
        for plugin in self.registry.iter().filter(|p| p.output_schema().has_pid()) {
            view.absorb(plugin.name(), &self.store.list(evidence_id, plugin.name()));
        }

        if view.is_empty() {
            return Err(MemtaskError::NotFound(format!(
                "process {pid} in evidence {evidence_id}"
            )));
        }
        Ok(view)
    }
}
