// src/exec/mod.rs

//! Execution layer.
//!
//! - [`worker`] is the per-worker loop: dequeue, claim, run the plugin on its
//!   own task, persist artefacts and record the outcome.
//! - [`pool`] supervises a fixed number of workers, recycles the ones that
//!   stopped a runaway plugin call and runs the reconciliation sweep.
//! - [`cancel`] tracks per-task cancel handles and the set of live workers.
//! - [`command`] is the production [`AnalysisEngine`](crate::plugins::AnalysisEngine)
//!   that shells out to the configured forensic tool.

pub mod cancel;
pub mod command;
pub mod pool;
pub mod worker;

pub use cancel::{CancelRegistry, LiveWorkers};
pub use command::CommandEngine;
pub use pool::{PoolSettings, SweepHook, WorkerPool};
pub use worker::{WorkerContext, WorkerExit, run_worker};
