// src/exec/worker.rs

//! A single worker: dequeue, claim, execute, persist, record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::artefacts::{ArtefactRecord, ArtefactStore, DumpStore};
use crate::dispatch::WorkQueueRx;
use crate::evidence::EvidenceCatalog;
use crate::exec::cancel::{CancelRegistry, LiveWorkers};
use crate::ledger::{ABORTED_MESSAGE, DEADLINE_MESSAGE, FailureKind, Task, TaskLedger, TaskState};
use crate::plugins::{Invocation, PluginOutput, PluginRegistry, PluginResult};
use crate::types::{TaskId, WorkerId};

/// Receiving half of the work queue, shared by all workers.
pub type SharedQueue = Arc<Mutex<WorkQueueRx>>;

/// Everything a worker needs, shared across the pool.
pub struct WorkerContext {
    pub ledger: Arc<TaskLedger>,
    pub registry: Arc<PluginRegistry>,
    pub evidence: Arc<dyn EvidenceCatalog>,
    pub store: Arc<dyn ArtefactStore>,
    pub dumps: DumpStore,
    pub cancels: Arc<CancelRegistry>,
    pub live: Arc<LiveWorkers>,
    pub task_deadline: Option<Duration>,
}

/// Why a worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Shutdown requested or queue closed.
    Shutdown,
    /// The worker stopped a plugin call mid-run (deadline or kill); the
    /// pool replaces it with a fresh worker.
    Recycle,
}

enum Step {
    Continue,
    Recycle,
    Shutdown,
}

enum Execution {
    Finished(Result<PluginResult, tokio::task::JoinError>),
    DeadlineExceeded,
    Cancelled,
    Shutdown,
}

/// Worker loop: pull task ids until shutdown, the queue closes, or a
/// stopped invocation forces a recycle.
pub async fn run_worker(
    id: WorkerId,
    ctx: Arc<WorkerContext>,
    queue: SharedQueue,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerExit {
    let _live = ctx.live.enter(id);
    debug!(worker = id, "worker started");

    loop {
        if *shutdown.borrow() {
            return WorkerExit::Shutdown;
        }

        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            task_id = dequeue(&queue) => task_id,
        };

        let Some(task_id) = next else {
            debug!(worker = id, "worker stopping");
            return WorkerExit::Shutdown;
        };

        match execute(id, &ctx, task_id, &mut shutdown).await {
            Step::Continue => {}
            Step::Recycle => return WorkerExit::Recycle,
            Step::Shutdown => return WorkerExit::Shutdown,
        }
    }
}

async fn dequeue(queue: &SharedQueue) -> Option<TaskId> {
    queue.lock().await.recv().await
}

async fn execute(
    worker: WorkerId,
    ctx: &WorkerContext,
    task_id: TaskId,
    shutdown: &mut watch::Receiver<bool>,
) -> Step {
    // Registered before the claim so a kill that lands right after the task
    // turns Running always reaches this worker.
    let cancel_rx = ctx.cancels.register(task_id);

    let task = match ctx.ledger.start(task_id, worker, Utc::now()) {
        Ok(task) => task,
        Err(e) => {
            // Killed while queued, or already handled after a recovery.
            ctx.cancels.remove(task_id);
            debug!(worker, task_id = %task_id, error = %e, "skipping dequeued task");
            return Step::Continue;
        }
    };

    let span = info_span!(
        "task",
        task_id = %task.id,
        evidence_id = task.evidence_id,
        plugin = %task.plugin,
        attempt = task.attempt,
        worker
    );
    let step = run_claimed(ctx, task, cancel_rx, shutdown)
        .instrument(span)
        .await;
    ctx.cancels.remove(task_id);
    step
}

async fn run_claimed(
    ctx: &WorkerContext,
    task: Task,
    mut cancel_rx: oneshot::Receiver<()>,
    shutdown: &mut watch::Receiver<bool>,
) -> Step {
    let Some(plugin) = ctx.registry.get(&task.plugin).cloned() else {
        record_failure(ctx, &task, FailureKind::ExecutionFailure, "plugin is not registered");
        return Step::Continue;
    };

    let Some(evidence) = ctx.evidence.resolve(task.evidence_id) else {
        let message = format!("evidence {} not found", task.evidence_id);
        record_failure(ctx, &task, FailureKind::ExecutionFailure, &message);
        return Step::Continue;
    };

    let output_dir = if plugin.descriptor().produces_file {
        match ctx.dumps.prepare(task.evidence_id, task.id).await {
            Ok(dir) => dir,
            Err(e) => {
                let message = format!("cannot create dump directory: {e}");
                record_failure(ctx, &task, FailureKind::ExecutionFailure, &message);
                return Step::Continue;
            }
        }
    } else {
        ctx.dumps.task_dir(task.evidence_id, task.id)
    };

    let invocation = Invocation {
        task_id: task.id,
        evidence,
        plugin: task.plugin.clone(),
        parameters: task.parameters.clone(),
        output_dir,
    };

    info!("running plugin");
    let started = Instant::now();

    // Own task so a panicking plugin is reported instead of taking the
    // worker down.
    let mut handle = tokio::spawn(async move { plugin.execute(&invocation).await });
    let deadline = ctx.task_deadline;

    let execution = tokio::select! {
        biased;
        Ok(()) = &mut cancel_rx => Execution::Cancelled,
        _ = shutdown.changed() => Execution::Shutdown,
        joined = &mut handle => Execution::Finished(joined),
        () = async {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        } => Execution::DeadlineExceeded,
    };

    if !matches!(execution, Execution::Finished(_)) {
        stop_invocation(handle).await;
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;

    match execution {
        Execution::Finished(Ok(Ok(output))) => {
            persist(ctx, &task, output, elapsed_ms).await;
            Step::Continue
        }
        Execution::Finished(Ok(Err(failure))) => {
            warn!(elapsed_ms, error = %failure, "plugin reported failure");
            record_failure(ctx, &task, FailureKind::ExecutionFailure, &failure.message);
            ctx.dumps.discard(task.evidence_id, task.id).await;
            Step::Continue
        }
        Execution::Finished(Err(join_error)) => {
            error!(elapsed_ms, error = %join_error, "plugin invocation panicked");
            let message = format!("plugin crashed: {join_error}");
            record_failure(ctx, &task, FailureKind::ExecutionFailure, &message);
            ctx.dumps.discard(task.evidence_id, task.id).await;
            Step::Continue
        }
        Execution::DeadlineExceeded => {
            warn!(elapsed_ms, "deadline exceeded; plugin invocation stopped");
            record_failure(ctx, &task, FailureKind::Aborted, DEADLINE_MESSAGE);
            ctx.dumps.discard(task.evidence_id, task.id).await;
            Step::Recycle
        }
        Execution::Cancelled => {
            // The restart controller already marked the task Failed.
            info!(elapsed_ms, "invocation killed by restart");
            ctx.dumps.discard(task.evidence_id, task.id).await;
            Step::Recycle
        }
        Execution::Shutdown => {
            warn!(elapsed_ms, "shutdown while plugin running; invocation stopped");
            record_failure(ctx, &task, FailureKind::Aborted, ABORTED_MESSAGE);
            Step::Shutdown
        }
    }
}

/// Abort the plugin task and wait until its future is dropped, which kills
/// any engine process it owns.
async fn stop_invocation(handle: JoinHandle<PluginResult>) {
    handle.abort();
    match handle.await {
        Err(e) if e.is_cancelled() => debug!("plugin invocation stopped"),
        Err(e) => warn!(error = %e, "plugin invocation ended abnormally while stopping"),
        Ok(_) => debug!("plugin invocation finished before it could be stopped; result dropped"),
    }
}

/// Store artefacts, then flip the task to Succeeded.
async fn persist(ctx: &WorkerContext, task: &Task, output: PluginOutput, elapsed_ms: u64) {
    let mut records = Vec::with_capacity(output.records.len());

    for produced in output.records {
        let file_ref = match produced.file {
            Some(path) => match ctx.dumps.file_ref(task.evidence_id, task.id, &path).await {
                Ok(file_ref) => Some(file_ref),
                Err(e) => {
                    let message = format!("plugin reported an unusable dump file: {e}");
                    record_failure(ctx, task, FailureKind::ExecutionFailure, &message);
                    ctx.dumps.discard(task.evidence_id, task.id).await;
                    return;
                }
            },
            None => None,
        };

        records.push(ArtefactRecord {
            evidence_id: task.evidence_id,
            plugin: task.plugin.clone(),
            task_id: task.id,
            payload: produced.payload,
            file_ref,
            created_at: Utc::now(),
        });
    }

    let record_count = records.len();
    let store = &ctx.store;
    match ctx
        .ledger
        .succeed(task.id, Utc::now(), |t| store.commit(t.id, records))
    {
        Ok(_) => info!(elapsed_ms, record_count, "task succeeded"),
        Err(e) => {
            warn!(error = %e, "result not recorded");
            // Still Running means the commit itself failed, not a kill.
            let still_running = ctx
                .ledger
                .get(task.id)
                .is_some_and(|t| t.state == TaskState::Running);
            if still_running {
                let message = format!("failed to store artefacts: {e}");
                record_failure(ctx, task, FailureKind::ExecutionFailure, &message);
            }
            ctx.dumps.discard(task.evidence_id, task.id).await;
        }
    }
}

fn record_failure(ctx: &WorkerContext, task: &Task, kind: FailureKind, message: &str) {
    match ctx.ledger.fail(task.id, kind, message, Utc::now()) {
        Ok(_) => info!(?kind, error = message, "task failed"),
        Err(e) => debug!(error = %e, "task already terminal; failure not recorded"),
    }
}
