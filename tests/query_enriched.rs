// tests/query_enriched.rs

mod common;
use crate::common::{
    Gate, Script, ScriptedEngine, TestHarness, handle_row, init_tracing, params, pslist_row,
};

use memtask::MemtaskError;

#[tokio::test]
async fn enriched_process_joins_plugins_by_pid() {
    init_tracing();
    let gate = Gate::new();
    let engine = ScriptedEngine::new()
        .with_script(
            "pslist",
            Script::gated(
                &gate,
                Script::records([pslist_row(1, "systemd"), pslist_row(1234, "bash")]),
            ),
        )
        .with_script(
            "handles",
            Script::gated(
                &gate,
                Script::records([
                    handle_row(1234, 0, "/dev/pts/0"),
                    handle_row(1234, 3, "/home/user/.bash_history"),
                    handle_row(77, 1, "/var/log/syslog"),
                ]),
            ),
        );
    let harness = TestHarness::start(engine).await;

    let pslist = harness.orch().submit(7, "pslist", &params(&[])).unwrap();
    let handles = harness.orch().submit_handles(7, None).unwrap();

    let err = harness.orch().enriched_process(7, 1234).unwrap_err();
    assert!(matches!(err, MemtaskError::NotFound(_)));

    gate.open();
    harness.finish(pslist.id).await;
    harness.finish(handles.id).await;

    let view = harness.orch().enriched_process(7, 1234).unwrap();
    assert_eq!(view.pid, 1234);
    assert_eq!(view.evidence_id, 7);
    assert_eq!(view.plugins.keys().collect::<Vec<_>>(), ["handles", "pslist"]);

    let proc_rows = view.namespace("pslist");
    assert_eq!(proc_rows.len(), 1);
    assert_eq!(proc_rows[0]["COMM"], "bash");

    // Both plugins report a PID column; neither overwrites the other.
    let fds: Vec<_> = view.namespace("handles").iter().map(|r| r["FD"].clone()).collect();
    assert_eq!(fds, [0, 3]);
    assert!(view.namespace("timeliner").is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn enriched_process_is_scoped_to_one_evidence() {
    init_tracing();
    let engine =
        ScriptedEngine::new().with_script("pslist", Script::records([pslist_row(500, "sshd")]));
    let harness = TestHarness::start(engine).await;

    let handle = harness.orch().submit(9, "pslist", &params(&[])).unwrap();
    harness.finish(handle.id).await;

    assert!(harness.orch().enriched_process(9, 500).is_ok());
    assert!(matches!(
        harness.orch().enriched_process(7, 500).unwrap_err(),
        MemtaskError::NotFound(_)
    ));
    assert!(matches!(
        harness.orch().enriched_process(9, 501).unwrap_err(),
        MemtaskError::NotFound(_)
    ));
    assert!(matches!(
        harness.orch().enriched_process(404, 500).unwrap_err(),
        MemtaskError::NotFound(_)
    ));

    harness.shutdown().await;
}
