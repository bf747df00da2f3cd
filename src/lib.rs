// src/lib.rs

pub mod artefacts;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod evidence;
pub mod exec;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod plugins;
pub mod query;
pub mod restart;
pub mod snapshot;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artefacts::ArtefactRecord;
use crate::cli::{CliArgs, Command};
use crate::config::{ConfigFile, load_and_validate};
use crate::exec::CommandEngine;
use crate::ledger::{Task, TaskLedger, TaskState};
use crate::plugins::{builtin_descriptors, builtin_registry};
use crate::restart::{RestartMode, RestartTarget};
use crate::snapshot::StateSnapshot;
use crate::types::{EvidenceId, Parameters, TaskId};

pub use crate::errors::MemtaskError;
pub use crate::orchestrator::Orchestrator;

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone();

    match args.command {
        Command::Plugins => print_json(&builtin_descriptors()),
        Command::Check => {
            let cfg = load_config(&config_path)?;
            print_dry_run(&cfg);
            Ok(())
        }
        Command::Run {
            evidence,
            plugin,
            params,
        } => {
            let cfg = load_config(&config_path)?;
            let params: Parameters = params.into_iter().collect();
            run_plugin(cfg, evidence, &plugin, &params).await
        }
        Command::Tasks { evidence } => {
            let cfg = load_config(&config_path)?;
            list_tasks(&cfg, evidence).await
        }
        Command::Restart { task, kill } => {
            let cfg = load_config(&config_path)?;
            let mode = if kill {
                RestartMode::KillAndRestart
            } else {
                RestartMode::Normal
            };
            restart_task(cfg, task, mode).await
        }
    }
}

fn load_config(path: &Path) -> Result<ConfigFile> {
    load_and_validate(path).with_context(|| format!("loading config from {:?}", path))
}

async fn start_orchestrator(cfg: &ConfigFile) -> Result<Orchestrator> {
    let engine = Arc::new(CommandEngine::new(&cfg.engine));
    let registry = builtin_registry(engine);
    let evidence = Arc::new(cfg.evidence_catalog());
    debug!(evidence = ?evidence.ids().collect::<Vec<_>>(), "evidence catalog loaded");
    let orchestrator = Orchestrator::start(cfg.orchestrator.clone(), registry, evidence).await?;
    Ok(orchestrator)
}

#[derive(Serialize)]
struct TaskReport {
    task: Task,
    artefacts: Vec<ArtefactRecord>,
}

async fn run_plugin(
    cfg: ConfigFile,
    evidence: EvidenceId,
    plugin: &str,
    params: &Parameters,
) -> Result<()> {
    let orchestrator = start_orchestrator(&cfg).await?;
    let outcome = submit_and_report(&orchestrator, evidence, plugin, params).await;
    orchestrator.shutdown().await?;
    outcome
}

async fn submit_and_report(
    orchestrator: &Orchestrator,
    evidence: EvidenceId,
    plugin: &str,
    params: &Parameters,
) -> Result<()> {
    let handle = orchestrator.submit(evidence, plugin, params)?;
    info!(task_id = %handle.id, deduplicated = handle.deduplicated, "submitted");
    wait_and_report(orchestrator, handle.id).await
}

async fn restart_task(cfg: ConfigFile, task: TaskId, mode: RestartMode) -> Result<()> {
    if cfg.orchestrator.state_file.is_none() {
        bail!("restart needs [orchestrator].state_file to find earlier tasks");
    }
    let orchestrator = start_orchestrator(&cfg).await?;
    let outcome = match orchestrator.restart(&RestartTarget::Task(task), mode) {
        Ok(handle) => {
            info!(task_id = %handle.id, attempt = handle.attempt, "restarted");
            wait_and_report(&orchestrator, handle.id).await
        }
        Err(e) => Err(e.into()),
    };
    orchestrator.shutdown().await?;
    outcome
}

/// Wait for the task (or Ctrl-C) and print it with its artefacts.
async fn wait_and_report(orchestrator: &Orchestrator, task_id: TaskId) -> Result<()> {
    let task = tokio::select! {
        task = orchestrator.wait_for_terminal(task_id) => task?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl+C")?;
            warn!(task_id = %task_id, "interrupted; shutting down");
            bail!("interrupted while waiting for task {task_id}");
        }
    };

    let artefacts = match task.state {
        TaskState::Succeeded => orchestrator
            .list_artefacts(task.evidence_id, &task.plugin)?
            .into_iter()
            .filter(|r| r.task_id == task.id)
            .collect(),
        _ => Vec::new(),
    };

    let failed = task.state == TaskState::Failed;
    let message = task.error_message.clone().unwrap_or_default();
    print_json(&TaskReport { task, artefacts })?;

    if failed {
        return Err(anyhow!("task {task_id} failed: {message}"));
    }
    Ok(())
}

async fn list_tasks(cfg: &ConfigFile, evidence: EvidenceId) -> Result<()> {
    let Some(path) = &cfg.orchestrator.state_file else {
        bail!("no [orchestrator].state_file configured; no task history available");
    };
    let tasks = match StateSnapshot::load(path).await? {
        Some(snapshot) => snapshot.into_parts().0,
        None => Vec::new(),
    };
    let ledger = TaskLedger::restore(tasks);
    print_json(&ledger.list_for_evidence(evidence))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Simple dry-run output: print the validated configuration.
fn print_dry_run(cfg: &ConfigFile) {
    let o = &cfg.orchestrator;
    println!("memtask dry-run");
    println!("  orchestrator.workers = {}", o.workers);
    println!("  orchestrator.task_deadline = {:?}", o.task_deadline);
    println!("  orchestrator.sweep_interval = {:?}", o.sweep_interval);
    println!("  orchestrator.max_attempts = {:?}", o.max_attempts);
    println!("  orchestrator.dump_dir = {}", o.dump_dir.display());
    if let Some(state_file) = &o.state_file {
        println!("  orchestrator.state_file = {}", state_file.display());
    }
    println!();

    println!("engine: {} {:?}", cfg.engine.program, cfg.engine.base_args);
    for descriptor in builtin_descriptors() {
        match cfg.engine.plugins.get(descriptor.name) {
            Some(command) => {
                println!("  - {} ({})", descriptor.name, descriptor.kind);
                println!("      args: {:?}", command.args);
                if !command.param_args.is_empty() {
                    println!("      param_args: {:?}", command.param_args);
                }
            }
            None => println!("  - {} ({}): not configured", descriptor.name, descriptor.kind),
        }
    }
    println!();

    println!("evidence ({}):", cfg.evidence.len());
    for evidence in &cfg.evidence {
        println!("  - {}: {}", evidence.id, evidence.image.display());
    }

    debug!("dry-run complete (no execution)");
}
