// src/exec/pool.rs

//! Worker pool supervisor.
//!
//! The supervisor owns a fixed number of worker tasks. It replaces workers
//! that exit with [`WorkerExit::Recycle`] (stopped plugin call) or that
//! panicked, and runs the periodic reconciliation sweep that fails Running
//! tasks whose worker is gone.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::dispatch::WorkQueueRx;
use crate::exec::worker::{SharedQueue, WorkerContext, WorkerExit, run_worker};
use crate::types::WorkerId;

/// Hook run after every reconciliation sweep (used for state snapshots).
pub type SweepHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub workers: usize,
    pub sweep_interval: Duration,
}

/// Handle to the running pool.
#[derive(Debug)]
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

impl WorkerPool {
    /// Spawn the supervisor and its workers on the current Tokio runtime.
    pub fn spawn(
        ctx: Arc<WorkerContext>,
        queue: WorkQueueRx,
        settings: PoolSettings,
        after_sweep: Option<SweepHook>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue: SharedQueue = Arc::new(Mutex::new(queue));

        let supervisor = tokio::spawn(supervise(ctx, queue, settings, shutdown_rx, after_sweep));

        Self {
            shutdown_tx,
            supervisor,
        }
    }

    /// Stop all workers and wait for the supervisor to finish.
    ///
    /// Tasks still running are marked Failed/Aborted by their workers.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.supervisor.await {
            error!(error = %e, "worker pool supervisor ended abnormally");
        }
    }
}

struct Spawner {
    ctx: Arc<WorkerContext>,
    queue: SharedQueue,
    shutdown: watch::Receiver<bool>,
    next_id: WorkerId,
}

impl Spawner {
    fn spawn(&mut self, workers: &mut JoinSet<WorkerExit>) {
        self.next_id += 1;
        let id = self.next_id;
        workers.spawn(run_worker(
            id,
            Arc::clone(&self.ctx),
            Arc::clone(&self.queue),
            self.shutdown.clone(),
        ));
        debug!(worker = id, "spawned worker");
    }
}

async fn supervise(
    ctx: Arc<WorkerContext>,
    queue: SharedQueue,
    settings: PoolSettings,
    mut shutdown: watch::Receiver<bool>,
    after_sweep: Option<SweepHook>,
) {
    let size = settings.workers.max(1);
    info!(workers = size, "worker pool started");

    let mut spawner = Spawner {
        ctx: Arc::clone(&ctx),
        queue,
        shutdown: shutdown.clone(),
        next_id: 0,
    };
    let mut workers = JoinSet::new();
    for _ in 0..size {
        spawner.spawn(&mut workers);
    }

    let mut ticker = tokio::time::interval(settings.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stopping = false;

    loop {
        tokio::select! {
            _ = ticker.tick(), if !stopping => {
                sweep(&ctx);
                if let Some(hook) = &after_sweep {
                    hook();
                }
            }
            _ = shutdown.changed(), if !stopping => {
                info!("worker pool shutting down");
                stopping = true;
            }
            joined = workers.join_next() => {
                let Some(joined) = joined else {
                    break;
                };
                match joined {
                    Ok(WorkerExit::Shutdown) => {
                        // Queue closed without an explicit shutdown: nothing
                        // more will ever arrive.
                        stopping = true;
                    }
                    Ok(WorkerExit::Recycle) if !stopping => {
                        info!("recycling worker after stopped invocation");
                        spawner.spawn(&mut workers);
                    }
                    Ok(WorkerExit::Recycle) => {}
                    Err(e) => {
                        error!(error = %e, "worker crashed");
                        if !stopping {
                            spawner.spawn(&mut workers);
                        }
                    }
                }
            }
        }
    }

    // Final sweep so nothing is left Running without an owner.
    sweep(&ctx);
    if let Some(hook) = &after_sweep {
        hook();
    }
    info!("worker pool stopped");
}

/// Fail Running tasks that are past their deadline and have no live worker.
///
/// Without a configured deadline only the ownership check applies.
pub fn sweep(ctx: &WorkerContext) -> Vec<crate::types::TaskId> {
    let deadline = ctx
        .task_deadline
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .unwrap_or_else(chrono::Duration::zero);
    let live = ctx.live.snapshot();
    let reaped = ctx.ledger.reap_stuck(Utc::now(), deadline, &live);
    if !reaped.is_empty() {
        warn!(count = reaped.len(), "reconciliation sweep aborted orphaned tasks");
    }
    reaped
}
