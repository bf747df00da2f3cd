// src/snapshot.rs

//! JSON state snapshot of the ledger and the artefact store.
//!
//! Written after every reconciliation sweep and on shutdown, read once at
//! startup. The file is replaced atomically (write to a sibling temp file,
//! then rename) so a crash mid-write leaves the previous snapshot intact.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::artefacts::{ArtefactRecord, ArtefactStore};
use crate::errors::Result;
use crate::ledger::{Task, TaskLedger, TaskState};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
    pub artefacts: Vec<ArtefactRecord>,
}

impl StateSnapshot {
    pub fn new(tasks: Vec<Task>, artefacts: Vec<ArtefactRecord>) -> Self {
        Self {
            version: FORMAT_VERSION,
            saved_at: Utc::now(),
            tasks,
            artefacts,
        }
    }

    /// Capture a consistent view of `ledger` and `store`.
    pub fn capture(ledger: &TaskLedger, store: &dyn ArtefactStore) -> Self {
        let (tasks, artefacts) = ledger.snapshot_with(|| store.snapshot());
        Self::new(tasks, artefacts)
    }

    /// Read a snapshot; `Ok(None)` when the file does not exist yet.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no state snapshot found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: StateSnapshot = serde_json::from_slice(&bytes)?;
        info!(
            path = %path.display(),
            tasks = snapshot.tasks.len(),
            artefacts = snapshot.artefacts.len(),
            "loaded state snapshot"
        );
        Ok(Some(snapshot))
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = temp_path(path);
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), tasks = self.tasks.len(), "saved state snapshot");
        Ok(())
    }

    /// Drop artefacts whose task is not recorded as Succeeded.
    pub fn into_parts(self) -> (Vec<Task>, Vec<ArtefactRecord>) {
        let succeeded: HashSet<_> = self
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Succeeded)
            .map(|t| t.id)
            .collect();
        let (artefacts, orphaned): (Vec<_>, Vec<_>) = self
            .artefacts
            .into_iter()
            .partition(|r| succeeded.contains(&r.task_id));
        if !orphaned.is_empty() {
            warn!(count = orphaned.len(), "dropping snapshot artefacts without a succeeded task");
        }
        (self.tasks, artefacts)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serializes snapshot writes to one file.
pub struct SnapshotWriter {
    path: PathBuf,
    ledger: Arc<TaskLedger>,
    store: Arc<dyn ArtefactStore>,
    write_lock: Mutex<()>,
}

impl SnapshotWriter {
    pub fn new(path: PathBuf, ledger: Arc<TaskLedger>, store: Arc<dyn ArtefactStore>) -> Self {
        Self {
            path,
            ledger,
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        StateSnapshot::capture(&self.ledger, self.store.as_ref())
            .save(&self.path)
            .await
    }
}
