// tests/restart.rs

mod common;
use crate::common::{Gate, Script, ScriptedEngine, TestHarness, init_tracing, params, pslist_row};

use std::time::Duration;

use memtask::MemtaskError;
use memtask::ledger::{FailureKind, RESTARTED_MESSAGE, TaskState};
use memtask::restart::{RestartMode, RestartTarget};
use memtask::types::TaskId;

#[tokio::test]
async fn failed_task_is_restarted_as_a_new_attempt() {
    init_tracing();
    let engine = ScriptedEngine::new();
    engine
        .script("dumpfiles", Script::fail("file not found in image"))
        .script("dumpfiles", Script::records([]));
    let harness = TestHarness::start(engine).await;

    let first = harness.orch().submit_file_dump(7, "/tmp/x").unwrap();
    let failed = harness.finish(first.id).await;
    assert_eq!(failed.state, TaskState::Failed);

    let listed = harness.orch().list_tasks(7).unwrap();
    assert!(listed.iter().any(|t| t.id == first.id && t.state == TaskState::Failed));

    let second = harness
        .orch()
        .restart(&RestartTarget::Task(first.id), RestartMode::Normal)
        .unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.attempt, 2);
    assert_eq!(second.state, TaskState::Pending);
    assert_eq!(second.dedup_key, first.dedup_key);

    let done = harness.finish(second.id).await;
    assert_eq!(done.state, TaskState::Succeeded);
    assert_eq!(done.parameters.get("path").map(String::as_str), Some("/tmp/x"));

    // The failed attempt stays as history.
    let history = harness.orch().task_history(&first.dedup_key);
    let attempts: Vec<_> = history.iter().map(|t| (t.attempt, t.state)).collect();
    assert_eq!(attempts, [(1, TaskState::Failed), (2, TaskState::Succeeded)]);
    assert_eq!(harness.orch().list_tasks(7).unwrap().len(), 2);

    harness.shutdown().await;
}

#[tokio::test]
async fn restart_by_dedup_key_targets_latest_attempt() {
    init_tracing();
    let engine = ScriptedEngine::new().with_script("handles", Script::fail("bad profile"));
    let harness = TestHarness::start(engine).await;

    let first = harness.orch().submit_handles(9, Some(4)).unwrap();
    harness.finish(first.id).await;
    let second = harness
        .orch()
        .restart(&RestartTarget::Key(first.dedup_key.clone()), RestartMode::Normal)
        .unwrap();
    harness.finish(second.id).await;

    let third = harness
        .orch()
        .restart(&RestartTarget::Key(first.dedup_key.clone()), RestartMode::Normal)
        .unwrap();
    assert_eq!(third.attempt, 3);

    // Targeting an old attempt also restarts from the latest one.
    harness.finish(third.id).await;
    let fourth = harness
        .orch()
        .restart(&RestartTarget::Task(first.id), RestartMode::Normal)
        .unwrap();
    assert_eq!(fourth.attempt, 4);

    harness.finish(fourth.id).await;
    harness.shutdown().await;
}

#[tokio::test]
async fn active_tasks_cannot_be_restarted_normally() {
    init_tracing();
    let gate = Gate::new();
    let engine = ScriptedEngine::new()
        .with_script("pslist", Script::gated(&gate, Script::records([pslist_row(1, "init")])));
    let harness = TestHarness::start_with(engine, |s| s.workers = 1).await;

    let running = harness.orch().submit(7, "pslist", &params(&[])).unwrap();
    harness.wait_for_state(running.id, TaskState::Running).await;
    // The only worker is busy, so this one stays queued.
    let pending = harness.orch().submit_handles(7, None).unwrap();

    for id in [running.id, pending.id] {
        let err = harness
            .orch()
            .restart(&RestartTarget::Task(id), RestartMode::Normal)
            .unwrap_err();
        assert!(matches!(err, MemtaskError::InvalidState { task_id, .. } if task_id == id));
    }
    assert_eq!(harness.orch().get_task(pending.id).unwrap().state, TaskState::Pending);

    gate.open();
    harness.finish(running.id).await;
    harness.finish(pending.id).await;
    harness.shutdown().await;
}

#[tokio::test]
async fn succeeded_work_is_not_restarted() {
    init_tracing();
    let harness = TestHarness::start(ScriptedEngine::new()).await;

    let handle = harness.orch().submit_timeliner(7).unwrap();
    harness.finish(handle.id).await;

    let err = harness
        .orch()
        .restart(&RestartTarget::Task(handle.id), RestartMode::KillAndRestart)
        .unwrap_err();
    assert!(matches!(err, MemtaskError::InvalidState { .. }));

    let err = harness
        .orch()
        .restart(&RestartTarget::Task(TaskId(999)), RestartMode::Normal)
        .unwrap_err();
    assert!(matches!(err, MemtaskError::NotFound(_)));

    harness.shutdown().await;
}

#[tokio::test]
async fn kill_and_restart_replaces_a_running_attempt() {
    init_tracing();
    let gate = Gate::new();
    let engine = ScriptedEngine::new();
    engine
        .script("pslist", Script::gated(&gate, Script::records([])))
        .script("pslist", Script::records([pslist_row(1234, "bash")]));
    let harness = TestHarness::start(engine).await;

    let stuck = harness.orch().submit(7, "pslist", &params(&[])).unwrap();
    harness.wait_for_state(stuck.id, TaskState::Running).await;
    while gate.entered() == 0 {
        tokio::task::yield_now().await;
    }

    let fresh = harness
        .orch()
        .restart(&RestartTarget::Task(stuck.id), RestartMode::KillAndRestart)
        .unwrap();
    assert_eq!(fresh.attempt, 2);

    let killed = harness.orch().get_task(stuck.id).unwrap();
    assert_eq!(killed.state, TaskState::Failed);
    assert_eq!(killed.failure, Some(FailureKind::Aborted));
    assert_eq!(killed.error_message.as_deref(), Some(RESTARTED_MESSAGE));

    let done = harness.finish(fresh.id).await;
    assert_eq!(done.state, TaskState::Succeeded);

    // Only the new attempt's records are visible.
    let records = harness.orch().list_artefacts(7, "pslist").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task_id, fresh.id);

    // The killed call was stopped, so opening its gate finishes nothing.
    gate.open();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.engine.completed_count("pslist"), 1);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn kill_right_after_claim_stops_the_dump_call() {
    init_tracing();
    let engine = ScriptedEngine::new().with_script(
        "pslist.dump",
        Script::sleep(Duration::from_millis(300), Script::records([])),
    );
    let harness = TestHarness::start_with(engine, |s| s.workers = 1).await;

    for (round, pid) in (100..105u32).enumerate() {
        let first = harness.orch().submit_process_dump_pslist(7, pid).unwrap();
        harness.wait_for_state(first.id, TaskState::Running).await;

        let fresh = harness
            .orch()
            .restart(&RestartTarget::Task(first.id), RestartMode::KillAndRestart)
            .unwrap();
        assert_eq!(harness.finish(fresh.id).await.state, TaskState::Succeeded);

        // Only the new attempt ran to the end; the single worker was never
        // held by the killed one.
        assert_eq!(harness.engine.completed_count("pslist.dump"), round + 1);
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn max_attempts_caps_restarts() {
    init_tracing();
    let engine = ScriptedEngine::new().with_script("dumpfiles", Script::fail("read error"));
    let harness = TestHarness::start_with(engine, |s| s.max_attempts = Some(2)).await;

    let first = harness.orch().submit_file_dump(7, "/etc/shadow").unwrap();
    harness.finish(first.id).await;
    let second = harness
        .orch()
        .restart(&RestartTarget::Task(first.id), RestartMode::Normal)
        .unwrap();
    harness.finish(second.id).await;

    let err = harness
        .orch()
        .restart(&RestartTarget::Task(second.id), RestartMode::Normal)
        .unwrap_err();
    assert!(matches!(
        err,
        MemtaskError::AttemptsExhausted { attempt: 3, max: 2 }
    ));
    assert_eq!(harness.orch().task_history(&first.dedup_key).len(), 2);

    harness.shutdown().await;
}
