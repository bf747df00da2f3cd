// src/query/enrich.rs

//! Cross-plugin view of one process.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::artefacts::ArtefactRecord;
use crate::types::EvidenceId;

/// Every record mentioning one pid, namespaced by the plugin that produced
/// it. Plugins never overwrite each other's fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedProcess {
    pub evidence_id: EvidenceId,
    pub pid: u32,
    pub plugins: BTreeMap<String, Vec<Value>>,
}

impl EnrichedProcess {
    pub fn new(evidence_id: EvidenceId, pid: u32) -> Self {
        Self {
            evidence_id,
            pid,
            plugins: BTreeMap::new(),
        }
    }

    /// Add the records of one plugin that match this pid.
    pub fn absorb(&mut self, plugin: &str, records: &[ArtefactRecord]) {
        let matching: Vec<Value> = records
            .iter()
            .filter(|r| r.pid() == Some(self.pid))
            .map(|r| r.payload.clone())
            .collect();
        if !matching.is_empty() {
            self.plugins
                .entry(plugin.to_string())
                .or_default()
                .extend(matching);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Records contributed by `plugin`.
    pub fn namespace(&self, plugin: &str) -> &[Value] {
        self.plugins.get(plugin).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskId;
    use chrono::Utc;
    use serde_json::json;

    fn record(plugin: &str, payload: Value) -> ArtefactRecord {
        ArtefactRecord {
            evidence_id: 7,
            plugin: plugin.into(),
            task_id: TaskId(1),
            payload,
            file_ref: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn same_field_from_two_plugins_does_not_collide() {
        let pslist = [
            record("pslist", json!({"PID": 1234, "COMM": "bash"})),
            record("pslist", json!({"PID": 1, "COMM": "systemd"})),
        ];
        let handles = [record("handles", json!({"PID": 1234, "Process": "bash", "FD": 3}))];

        let mut view = EnrichedProcess::new(7, 1234);
        view.absorb("pslist", &pslist);
        view.absorb("handles", &handles);

        assert_eq!(view.namespace("pslist"), [json!({"PID": 1234, "COMM": "bash"})]);
        assert_eq!(view.namespace("handles").len(), 1);
        assert!(view.namespace("timeliner").is_empty());
    }

    #[test]
    fn no_match_leaves_view_empty() {
        let mut view = EnrichedProcess::new(7, 42);
        view.absorb("pslist", &[record("pslist", json!({"PID": 1}))]);
        assert!(view.is_empty());
    }
}
