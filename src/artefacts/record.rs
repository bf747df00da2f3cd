// src/artefacts/record.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EvidenceId, TaskId};

/// Opaque retrieval pointer for a binary dump, relative to the dump root.
///
/// Clients get this instead of inline bytes; [`super::DumpStore::resolve`]
/// turns it back into a readable path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileRef(pub(crate) String);

impl FileRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One structured output unit of a plugin run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtefactRecord {
    pub evidence_id: EvidenceId,
    pub plugin: String,
    /// Provenance: the task that produced this record.
    pub task_id: TaskId,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ref: Option<FileRef>,
    pub created_at: DateTime<Utc>,
}

impl ArtefactRecord {
    /// Read the process id from the payload, if the record carries one.
    ///
    /// Accepts `PID`/`pid` (any case) as a number or numeric string.
    pub fn pid(&self) -> Option<u32> {
        let obj = self.payload.as_object()?;
        let (_, value) = obj.iter().find(|(k, _)| k.eq_ignore_ascii_case("pid"))?;
        match value {
            Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Pointer from a succeeded task to what it stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRef {
    pub task_id: TaskId,
    pub record_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
}
