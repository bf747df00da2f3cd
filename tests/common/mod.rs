#![allow(dead_code)]

pub use memtask_test_utils::builders;
pub use memtask_test_utils::{Gate, Script, ScriptedEngine, TestHarness, init_tracing, with_timeout};

use memtask::types::Parameters;
use serde_json::{Value, json};

pub fn params(pairs: &[(&str, &str)]) -> Parameters {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn pslist_row(pid: u32, comm: &str) -> Value {
    json!({ "OFFSET (V)": "0xffff8880", "PID": pid, "TID": pid, "PPID": 1, "COMM": comm })
}

pub fn handle_row(pid: u32, fd: u32, path: &str) -> Value {
    json!({ "PID": pid, "TID": pid, "Process": "bash", "FD": fd, "Path": path })
}

pub fn timeline_row(description: &str, created: Option<&str>) -> Value {
    json!({
        "Plugin": "PsList",
        "Description": description,
        "Created Date": created,
        "Modified Date": null,
        "Accessed Date": null,
        "Changed Date": null,
    })
}
