// src/artefacts/dumps.rs

//! Dump file storage.
//!
//! Every task writes its dumps into its own directory
//! `<root>/evidence-<id>/task-<id>/`, so concurrent tasks never touch the
//! same files. Records only carry a [`FileRef`] relative to the root.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::artefacts::record::FileRef;
use crate::errors::{MemtaskError, Result};
use crate::types::{EvidenceId, TaskId};

#[derive(Debug, Clone)]
pub struct DumpStore {
    root: PathBuf,
}

impl DumpStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_task_dir(evidence_id: EvidenceId, task_id: TaskId) -> PathBuf {
        PathBuf::from(format!("evidence-{evidence_id}")).join(format!("task-{task_id}"))
    }

    /// Absolute directory owned by `task_id`.
    pub fn task_dir(&self, evidence_id: EvidenceId, task_id: TaskId) -> PathBuf {
        self.root.join(Self::relative_task_dir(evidence_id, task_id))
    }

    /// Create the task's directory and return it.
    pub async fn prepare(&self, evidence_id: EvidenceId, task_id: TaskId) -> Result<PathBuf> {
        let dir = self.task_dir(evidence_id, task_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Turn a file reported by a plugin (relative to its output dir) into a
    /// [`FileRef`], checking that it exists and stays inside the task dir.
    pub async fn file_ref(
        &self,
        evidence_id: EvidenceId,
        task_id: TaskId,
        file: &Path,
    ) -> Result<FileRef> {
        let file = match file.strip_prefix(self.task_dir(evidence_id, task_id)) {
            Ok(relative) => relative,
            Err(_) => file,
        };
        ensure_relative(file)?;

        let relative = Self::relative_task_dir(evidence_id, task_id).join(file);
        let meta = tokio::fs::metadata(self.root.join(&relative)).await.map_err(|e| {
            MemtaskError::NotFound(format!("dump file '{}': {e}", file.display()))
        })?;
        if !meta.is_file() {
            return Err(MemtaskError::NotFound(format!(
                "dump file '{}' is not a regular file",
                file.display()
            )));
        }

        Ok(FileRef(to_slash_string(&relative)))
    }

    /// Resolve a [`FileRef`] to a readable path under the dump root.
    pub fn resolve(&self, file_ref: &FileRef) -> Result<PathBuf> {
        let relative = Path::new(file_ref.as_str());
        ensure_relative(relative)?;
        Ok(self.root.join(relative))
    }

    /// Remove everything a task wrote. Missing directories are fine.
    pub async fn discard(&self, evidence_id: EvidenceId, task_id: TaskId) {
        let dir = self.task_dir(evidence_id, task_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(task_id = %task_id, dir = %dir.display(), "discarded task dumps"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                task_id = %task_id,
                dir = %dir.display(),
                error = %e,
                "failed to discard task dumps"
            ),
        }
    }
}

fn ensure_relative(path: &Path) -> Result<()> {
    let clean = !path.as_os_str().is_empty()
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if clean {
        Ok(())
    } else {
        Err(MemtaskError::NotFound(format!(
            "dump path '{}' escapes the dump root",
            path.display()
        )))
    }
}

fn to_slash_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
