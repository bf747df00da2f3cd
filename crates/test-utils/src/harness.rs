use std::sync::Arc;
use std::time::Duration;

use memtask::config::OrchestratorSettings;
use memtask::evidence::StaticEvidenceCatalog;
use memtask::ledger::{Task, TaskState};
use memtask::plugins::builtin_registry;
use memtask::types::{EvidenceId, TaskId};
use memtask::Orchestrator;
use tempfile::TempDir;

use crate::builders::test_settings;
use crate::fake_engine::ScriptedEngine;

/// Evidence ids every harness knows about.
pub const EVIDENCE_IDS: [EvidenceId; 2] = [7, 9];

/// An orchestrator over a temporary directory, backed by a
/// [`ScriptedEngine`].
pub struct TestHarness {
    pub dir: TempDir,
    pub engine: Arc<ScriptedEngine>,
    orchestrator: Option<Orchestrator>,
}

impl TestHarness {
    pub async fn start(engine: ScriptedEngine) -> Self {
        Self::start_with(engine, |_| {}).await
    }

    /// Start with settings adjusted by `tweak`.
    pub async fn start_with(
        engine: ScriptedEngine,
        tweak: impl FnOnce(&mut OrchestratorSettings),
    ) -> Self {
        let dir = tempfile::tempdir().expect("creating harness tempdir");
        let mut settings = test_settings(dir.path().join("dumps"));
        tweak(&mut settings);
        Self::start_in(dir, Arc::new(engine), settings).await
    }

    /// Start over an existing directory, e.g. to reopen a state snapshot.
    pub async fn start_in(
        dir: TempDir,
        engine: Arc<ScriptedEngine>,
        settings: OrchestratorSettings,
    ) -> Self {
        let evidence = EVIDENCE_IDS
            .iter()
            .fold(StaticEvidenceCatalog::new(), |catalog, id| {
                catalog.with_image(*id, dir.path().join(format!("evidence-{id}.lime")))
            });
        let registry = builtin_registry(engine.clone());
        let orchestrator = Orchestrator::start(settings, registry, Arc::new(evidence))
            .await
            .expect("starting orchestrator");

        Self {
            dir,
            engine,
            orchestrator: Some(orchestrator),
        }
    }

    pub fn orch(&self) -> &Orchestrator {
        self.orchestrator
            .as_ref()
            .expect("orchestrator already shut down")
    }

    /// Wait (bounded) until the task is terminal.
    pub async fn finish(&self, task_id: TaskId) -> Task {
        tokio::time::timeout(Duration::from_secs(5), self.orch().wait_for_terminal(task_id))
            .await
            .expect("task did not finish within 5 seconds")
            .expect("task vanished from the ledger")
    }

    /// Poll until the task reaches `state`.
    pub async fn wait_for_state(&self, task_id: TaskId, state: TaskState) -> Task {
        let poll = async {
            loop {
                let task = self.orch().get_task(task_id).expect("unknown task");
                if task.state == state {
                    return task;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), poll)
            .await
            .unwrap_or_else(|_| panic!("task {task_id} never reached {state}"))
    }

    /// Shut the orchestrator down and hand back the directory.
    pub async fn shutdown(mut self) -> TempDir {
        if let Some(orchestrator) = self.orchestrator.take() {
            orchestrator.shutdown().await.expect("shutting down orchestrator");
        }
        self.dir
    }
}
