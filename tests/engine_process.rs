// tests/engine_process.rs

#![cfg(unix)]

mod common;
use crate::common::{builders, init_tracing, params};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use memtask::Orchestrator;
use memtask::config::{EngineConfig, OrchestratorSettings, PluginCommand};
use memtask::evidence::StaticEvidenceCatalog;
use memtask::exec::CommandEngine;
use memtask::ledger::{ABORTED_MESSAGE, DEADLINE_MESSAGE, FailureKind, Task, TaskState};
use memtask::plugins::builtin_registry;
use memtask::types::TaskId;

/// Engine running `sh -c <script>` for pslist.
fn shell_engine(script: &str) -> CommandEngine {
    let mut plugins = BTreeMap::new();
    plugins.insert(
        "pslist".to_string(),
        PluginCommand {
            args: vec!["-c".to_string(), script.to_string()],
            param_args: BTreeMap::new(),
        },
    );
    CommandEngine::new(&EngineConfig {
        program: "sh".to_string(),
        base_args: Vec::new(),
        plugins,
    })
}

/// Sleeps, then leaves a marker file behind if it was not killed.
fn slow_script(marker: &Path) -> String {
    format!("sleep 1; touch '{}'; echo '[]'", marker.display())
}

async fn start(dir: &Path, engine: CommandEngine, settings: OrchestratorSettings) -> Orchestrator {
    let evidence = StaticEvidenceCatalog::new().with_image(7, dir.join("evidence-7.lime"));
    Orchestrator::start(settings, builtin_registry(Arc::new(engine)), Arc::new(evidence))
        .await
        .unwrap()
}

async fn finish(orch: &Orchestrator, id: TaskId) -> Task {
    tokio::time::timeout(Duration::from_secs(5), orch.wait_for_terminal(id))
        .await
        .expect("task did not finish within 5 seconds")
        .unwrap()
}

#[tokio::test]
async fn deadline_kills_the_engine_process() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("finished");

    let mut settings = builders::test_settings(dir.path().join("dumps"));
    settings.workers = 1;
    settings.task_deadline = Some(Duration::from_millis(200));
    let orch = start(dir.path(), shell_engine(&slow_script(&marker)), settings).await;

    let handle = orch.submit(7, "pslist", &params(&[])).unwrap();
    let task = finish(&orch, handle.id).await;
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.failure, Some(FailureKind::Aborted));
    assert_eq!(task.error_message.as_deref(), Some(DEADLINE_MESSAGE));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "engine process outlived its deadline");

    orch.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_kills_the_engine_process_without_waiting() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("finished");

    let settings = builders::test_settings(dir.path().join("dumps"));
    let orch = start(dir.path(), shell_engine(&slow_script(&marker)), settings).await;

    let handle = orch.submit(7, "pslist", &params(&[])).unwrap();
    while orch.get_task(handle.id).unwrap().state != TaskState::Running {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    orch.shutdown().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(900));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "engine process outlived shutdown");
}

#[tokio::test]
async fn shutdown_marks_the_running_task_aborted() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("finished");
    let state_file = dir.path().join("memtask.json");

    let mut settings = builders::test_settings(dir.path().join("dumps"));
    settings.state_file = Some(state_file.clone());
    let orch = start(dir.path(), shell_engine(&slow_script(&marker)), settings).await;

    let handle = orch.submit(7, "pslist", &params(&[])).unwrap();
    while orch.get_task(handle.id).unwrap().state != TaskState::Running {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    orch.shutdown().await.unwrap();

    let snapshot = memtask::snapshot::StateSnapshot::load(&state_file)
        .await
        .unwrap()
        .expect("snapshot written on shutdown");
    let task = snapshot.tasks.iter().find(|t| t.id == handle.id).unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.error_message.as_deref(), Some(ABORTED_MESSAGE));
}

#[tokio::test]
async fn nonzero_exit_is_recorded_with_stderr() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let settings = builders::test_settings(dir.path().join("dumps"));
    let orch = start(dir.path(), shell_engine("echo 'image is truncated' >&2; exit 3"), settings).await;

    let handle = orch.submit(7, "pslist", &params(&[])).unwrap();
    let task = finish(&orch, handle.id).await;
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.failure, Some(FailureKind::ExecutionFailure));
    let message = task.error_message.unwrap();
    assert!(message.contains("code 3"), "{message}");
    assert!(message.contains("image is truncated"), "{message}");

    orch.shutdown().await.unwrap();
}

#[tokio::test]
async fn empty_output_from_the_engine_succeeds() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let settings = builders::test_settings(dir.path().join("dumps"));
    let orch = start(dir.path(), shell_engine("echo '[]'"), settings).await;

    let handle = orch.submit(7, "pslist", &params(&[])).unwrap();
    assert_eq!(finish(&orch, handle.id).await.state, TaskState::Succeeded);
    assert!(orch.list_artefacts(7, "pslist").unwrap().is_empty());

    orch.shutdown().await.unwrap();
}
