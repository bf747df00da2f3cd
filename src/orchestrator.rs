// src/orchestrator.rs

//! Wiring of the task orchestrator and the logical operations exposed to
//! the transport layer.
//!
//! All components are constructed here and injected into each other; there
//! is no process-wide state.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::artefacts::{ArtefactRecord, ArtefactStore, DumpStore, FileRef, MemoryArtefactStore};
use crate::config::OrchestratorSettings;
use crate::dispatch::{Dispatcher, work_queue};
use crate::errors::Result;
use crate::evidence::EvidenceCatalog;
use crate::exec::{CancelRegistry, LiveWorkers, PoolSettings, SweepHook, WorkerContext, WorkerPool, pool};
use crate::ledger::{Task, TaskHandle, TaskLedger};
use crate::plugins::catalog::{DUMPFILES, HANDLES, MAPS_DUMP, PSLIST_DUMP, TIMELINER};
use crate::plugins::PluginRegistry;
use crate::query::{EnrichedProcess, PluginAvailability, QueryFacade, TimelineEntry};
use crate::restart::{RestartController, RestartMode, RestartTarget};
use crate::snapshot::{SnapshotWriter, StateSnapshot};
use crate::types::{DedupKey, EvidenceId, Parameters, TaskId};

pub struct Orchestrator {
    registry: Arc<PluginRegistry>,
    ledger: Arc<TaskLedger>,
    dumps: DumpStore,
    dispatcher: Arc<Dispatcher>,
    query: QueryFacade,
    restarts: RestartController,
    worker_ctx: Arc<WorkerContext>,
    pool: WorkerPool,
    snapshots: Option<Arc<SnapshotWriter>>,
}

impl Orchestrator {
    /// Build all components, restore the state snapshot (if configured),
    /// run the recovery scan and start the worker pool.
    pub async fn start(
        settings: OrchestratorSettings,
        registry: PluginRegistry,
        evidence: Arc<dyn EvidenceCatalog>,
    ) -> Result<Self> {
        let registry = Arc::new(registry);

        let (tasks, artefacts) = match &settings.state_file {
            Some(path) => match StateSnapshot::load(path).await? {
                Some(snapshot) => snapshot.into_parts(),
                None => (Vec::new(), Vec::new()),
            },
            None => (Vec::new(), Vec::new()),
        };

        let ledger = Arc::new(TaskLedger::restore(tasks));
        let store: Arc<dyn ArtefactStore> = Arc::new(MemoryArtefactStore::from_records(artefacts));
        let recovered = ledger.recover(Utc::now());

        tokio::fs::create_dir_all(&settings.dump_dir).await?;
        let dumps = DumpStore::new(settings.dump_dir.clone());

        let (queue_tx, queue_rx) = work_queue();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&evidence),
            Arc::clone(&ledger),
            queue_tx,
        ));
        for id in &recovered {
            dispatcher.enqueue(*id)?;
        }
        if !recovered.is_empty() {
            info!(count = recovered.len(), "re-enqueued pending tasks from snapshot");
        }

        let cancels = Arc::new(CancelRegistry::new());
        let worker_ctx = Arc::new(WorkerContext {
            ledger: Arc::clone(&ledger),
            registry: Arc::clone(&registry),
            evidence: Arc::clone(&evidence),
            store: Arc::clone(&store),
            dumps: dumps.clone(),
            cancels: Arc::clone(&cancels),
            live: Arc::new(LiveWorkers::new()),
            task_deadline: settings.task_deadline,
        });

        let snapshots = settings.state_file.clone().map(|path| {
            Arc::new(SnapshotWriter::new(path, Arc::clone(&ledger), Arc::clone(&store)))
        });
        let after_sweep = snapshots.as_ref().map(|writer| {
            let writer = Arc::clone(writer);
            let hook: SweepHook = Arc::new(move || {
                let writer = Arc::clone(&writer);
                tokio::spawn(async move {
                    if let Err(e) = writer.write().await {
                        warn!(error = %e, "failed to write state snapshot");
                    }
                });
            });
            hook
        });

        let pool = WorkerPool::spawn(
            Arc::clone(&worker_ctx),
            queue_rx,
            PoolSettings {
                workers: settings.workers,
                sweep_interval: settings.sweep_interval,
            },
            after_sweep,
        );

        let query = QueryFacade::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            Arc::clone(&store),
            evidence,
        );
        let restarts = RestartController::new(
            Arc::clone(&ledger),
            Arc::clone(&dispatcher),
            cancels,
            settings.max_attempts,
        );

        info!(
            workers = settings.workers,
            plugins = registry.len(),
            dump_dir = %dumps.root().display(),
            state_file = ?snapshots.as_ref().map(|w| w.path().display().to_string()),
            "orchestrator started"
        );

        Ok(Self {
            registry,
            ledger,
            dumps,
            dispatcher,
            query,
            restarts,
            worker_ctx,
            pool,
            snapshots,
        })
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    // Read side.

    pub fn list_plugins(&self, evidence_id: EvidenceId) -> Result<Vec<PluginAvailability>> {
        self.query.list_plugins(evidence_id)
    }

    pub fn list_artefacts(&self, evidence_id: EvidenceId, plugin: &str) -> Result<Vec<ArtefactRecord>> {
        self.query.list_artefacts(evidence_id, plugin)
    }

    pub fn list_timeline_artefacts(
        &self,
        evidence_id: EvidenceId,
        plugin: &str,
    ) -> Result<Vec<TimelineEntry>> {
        self.query.list_timeline_artefacts(evidence_id, plugin)
    }

    pub fn list_tasks(&self, evidence_id: EvidenceId) -> Result<Vec<Task>> {
        self.query.list_tasks(evidence_id)
    }

    pub fn get_task(&self, task_id: TaskId) -> Result<Task> {
        self.query.get_task(task_id)
    }

    /// Every attempt for a dedup key, oldest first.
    pub fn task_history(&self, key: &DedupKey) -> Vec<Task> {
        self.ledger.history(key)
    }

    pub fn enriched_process(&self, evidence_id: EvidenceId, pid: u32) -> Result<EnrichedProcess> {
        self.query.enriched_process(evidence_id, pid)
    }

    /// Absolute path of a dump referenced by an artefact record.
    pub fn resolve_dump(&self, file_ref: &FileRef) -> Result<PathBuf> {
        self.dumps.resolve(file_ref)
    }

    pub async fn wait_for_terminal(&self, task_id: TaskId) -> Result<Task> {
        self.ledger.wait_for_terminal(task_id).await
    }

    // Submission.

    pub fn submit(
        &self,
        evidence_id: EvidenceId,
        plugin: &str,
        parameters: &Parameters,
    ) -> Result<TaskHandle> {
        self.dispatcher.submit(evidence_id, plugin, parameters)
    }

    pub fn submit_timeliner(&self, evidence_id: EvidenceId) -> Result<TaskHandle> {
        self.submit(evidence_id, TIMELINER, &Parameters::new())
    }

    /// Handles for every process, or only for `pid`.
    pub fn submit_handles(&self, evidence_id: EvidenceId, pid: Option<u32>) -> Result<TaskHandle> {
        let mut params = Parameters::new();
        if let Some(pid) = pid {
            params.insert("pid".into(), pid.to_string());
        }
        self.submit(evidence_id, HANDLES, &params)
    }

    pub fn submit_process_dump_pslist(&self, evidence_id: EvidenceId, pid: u32) -> Result<TaskHandle> {
        let params = Parameters::from([("pid".to_string(), pid.to_string())]);
        self.submit(evidence_id, PSLIST_DUMP, &params)
    }

    /// Dump one memory mapping `[start, end)` of `pid`.
    pub fn submit_process_dump_maps(
        &self,
        evidence_id: EvidenceId,
        pid: u32,
        start: u64,
        end: u64,
    ) -> Result<TaskHandle> {
        let params = Parameters::from([
            ("pid".to_string(), pid.to_string()),
            ("start".to_string(), format!("{start:#x}")),
            ("end".to_string(), format!("{end:#x}")),
        ]);
        self.submit(evidence_id, MAPS_DUMP, &params)
    }

    pub fn submit_file_dump(&self, evidence_id: EvidenceId, path: &str) -> Result<TaskHandle> {
        let params = Parameters::from([("path".to_string(), path.to_string())]);
        self.submit(evidence_id, DUMPFILES, &params)
    }

    pub fn restart(&self, target: &RestartTarget, mode: RestartMode) -> Result<TaskHandle> {
        self.restarts.restart(target, mode)
    }

    /// Run one reconciliation sweep now instead of waiting for the timer.
    pub fn reconcile(&self) -> Vec<TaskId> {
        pool::sweep(&self.worker_ctx)
    }

    pub async fn save_snapshot(&self) -> Result<()> {
        match &self.snapshots {
            Some(writer) => writer.write().await,
            None => Ok(()),
        }
    }

    /// Stop the workers (running tasks end as Failed/"aborted") and write a
    /// final snapshot.
    pub async fn shutdown(self) -> Result<()> {
        info!("orchestrator shutting down");
        let Self { pool, snapshots, .. } = self;
        pool.shutdown().await;
        if let Some(writer) = &snapshots {
            writer.write().await?;
        }
        info!("orchestrator stopped");
        Ok(())
    }
}
