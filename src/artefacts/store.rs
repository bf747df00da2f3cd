// src/artefacts/store.rs

//! Keyed storage for artefact records.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use tracing::debug;

use crate::artefacts::record::{ArtefactRecord, ResultRef};
use crate::errors::{MemtaskError, Result};
use crate::types::{EvidenceId, TaskId, lock};

/// Durable keyed storage for plugin output, addressed by
/// (evidence, plugin).
///
/// Writes are append-only and happen once per task: every task owns a
/// disjoint set of records, so no cross-task locking is needed by callers.
pub trait ArtefactStore: Send + Sync {
    /// Store all records of `task_id` at once. A second commit for the same
    /// task is rejected.
    fn commit(&self, task_id: TaskId, records: Vec<ArtefactRecord>) -> Result<ResultRef>;

    /// Records for one (evidence, plugin) pair in creation order.
    fn list(&self, evidence_id: EvidenceId, plugin: &str) -> Vec<ArtefactRecord>;

    /// All records of one evidence item, grouped by plugin name.
    fn list_for_evidence(&self, evidence_id: EvidenceId) -> Vec<ArtefactRecord>;

    fn count(&self, evidence_id: EvidenceId, plugin: &str) -> usize {
        self.list(evidence_id, plugin).len()
    }

    /// Every stored record, used for state snapshots.
    fn snapshot(&self) -> Vec<ArtefactRecord>;
}

#[derive(Debug, Default)]
struct Inner {
    by_pair: BTreeMap<(EvidenceId, String), Vec<ArtefactRecord>>,
    committed: HashSet<TaskId>,
}

/// In-process store; durability comes from the state snapshot.
#[derive(Debug, Default)]
pub struct MemoryArtefactStore {
    inner: Mutex<Inner>,
}

impl MemoryArtefactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from snapshot records.
    pub fn from_records(records: Vec<ArtefactRecord>) -> Self {
        let mut inner = Inner::default();
        for record in records {
            inner.committed.insert(record.task_id);
            inner
                .by_pair
                .entry((record.evidence_id, record.plugin.clone()))
                .or_default()
                .push(record);
        }
        Self {
            inner: Mutex::new(inner),
        }
    }
}

impl ArtefactStore for MemoryArtefactStore {
    fn commit(&self, task_id: TaskId, records: Vec<ArtefactRecord>) -> Result<ResultRef> {
        if let Some(stray) = records.iter().find(|r| r.task_id != task_id) {
            return Err(MemtaskError::invalid_state(
                task_id,
                format!("record belongs to task {}", stray.task_id),
            ));
        }

        let mut inner = lock(&self.inner);

        if !inner.committed.insert(task_id) {
            return Err(MemtaskError::invalid_state(
                task_id,
                "artefacts were already committed for this task",
            ));
        }

        let record_count = records.len();
        let mut files = Vec::new();
        for record in records {
            if let Some(file) = &record.file_ref {
                files.push(file.clone());
            }
            inner
                .by_pair
                .entry((record.evidence_id, record.plugin.clone()))
                .or_default()
                .push(record);
        }

        debug!(task_id = %task_id, record_count, "committed artefacts");

        Ok(ResultRef {
            task_id,
            record_count,
            files,
        })
    }

    fn list(&self, evidence_id: EvidenceId, plugin: &str) -> Vec<ArtefactRecord> {
        let inner = lock(&self.inner);
        inner
            .by_pair
            .get(&(evidence_id, plugin.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn list_for_evidence(&self, evidence_id: EvidenceId) -> Vec<ArtefactRecord> {
        let inner = lock(&self.inner);
        inner
            .by_pair
            .range((evidence_id, String::new())..)
            .take_while(|((id, _), _)| *id == evidence_id)
            .flat_map(|(_, records)| records.iter().cloned())
            .collect()
    }

    fn count(&self, evidence_id: EvidenceId, plugin: &str) -> usize {
        let inner = lock(&self.inner);
        inner
            .by_pair
            .get(&(evidence_id, plugin.to_string()))
            .map_or(0, Vec::len)
    }

    fn snapshot(&self) -> Vec<ArtefactRecord> {
        let inner = lock(&self.inner);
        inner.by_pair.values().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(task: u64, evidence: EvidenceId, plugin: &str, n: u64) -> ArtefactRecord {
        ArtefactRecord {
            evidence_id: evidence,
            plugin: plugin.to_string(),
            task_id: TaskId(task),
            payload: json!({ "n": n }),
            file_ref: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn commit_is_write_once_per_task() {
        let store = MemoryArtefactStore::new();
        let result = store.commit(TaskId(1), vec![record(1, 7, "pslist", 0)]).unwrap();
        assert_eq!(result.record_count, 1);

        let err = store.commit(TaskId(1), vec![]).unwrap_err();
        assert!(matches!(err, MemtaskError::InvalidState { .. }));
    }

    #[test]
    fn list_preserves_creation_order_and_is_empty_when_missing() {
        let store = MemoryArtefactStore::new();
        store
            .commit(TaskId(1), vec![record(1, 7, "handles", 0), record(1, 7, "handles", 1)])
            .unwrap();
        store.commit(TaskId(2), vec![record(2, 7, "handles", 2)]).unwrap();
        store.commit(TaskId(3), vec![record(3, 8, "handles", 3)]).unwrap();

        let ns: Vec<_> = store
            .list(7, "handles")
            .iter()
            .map(|r| r.payload["n"].as_u64().unwrap())
            .collect();
        assert_eq!(ns, vec![0, 1, 2]);
        assert!(store.list(7, "pslist").is_empty());
        assert_eq!(store.list_for_evidence(8).len(), 1);
        assert_eq!(store.count(7, "handles"), 3);
    }

    #[test]
    fn rejects_records_of_other_tasks() {
        let store = MemoryArtefactStore::new();
        let err = store.commit(TaskId(1), vec![record(2, 7, "pslist", 0)]).unwrap_err();
        assert!(matches!(err, MemtaskError::InvalidState { .. }));
    }

    #[test]
    fn snapshot_round_trips_through_from_records() {
        let store = MemoryArtefactStore::new();
        store.commit(TaskId(4), vec![record(4, 7, "pslist", 9)]).unwrap();

        let restored = MemoryArtefactStore::from_records(store.snapshot());
        assert_eq!(restored.list(7, "pslist").len(), 1);
        assert!(restored.commit(TaskId(4), vec![]).is_err());
    }
}
