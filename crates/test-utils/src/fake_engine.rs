use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use memtask::plugins::{
    AnalysisEngine, Invocation, PluginDescriptor, PluginFailure, PluginFuture, PluginOutput,
    PluginResult, ProducedRecord,
};
use serde_json::Value;
use tokio::sync::watch;

/// Upper bound on how long a gated plugin waits, so a test that forgets to
/// open its gate still finishes.
const GATE_TIMEOUT: Duration = Duration::from_secs(10);

/// A latch a scripted plugin waits on until the test opens it.
#[derive(Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
    entered: Arc<AtomicUsize>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self {
            open: Arc::new(open),
            entered: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    /// Number of plugin calls that reached this gate.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.open.subscribe();
        let _ = tokio::time::timeout(GATE_TIMEOUT, rx.wait_for(|open| *open)).await;
    }
}

/// What one scripted plugin call does.
#[derive(Clone)]
pub enum Script {
    /// Succeed with these payloads.
    Records(Vec<Value>),
    /// Write each `(payload, file name, bytes)` dump into the task's output
    /// dir and succeed.
    Dumps(Vec<(Value, String, Vec<u8>)>),
    /// Report a plugin failure.
    Fail(String),
    /// Block on the gate, then run the inner script.
    Gated(Gate, Box<Script>),
    /// Sleep, then run the inner script.
    Sleep(Duration, Box<Script>),
    Panic(String),
}

impl Script {
    pub fn records(payloads: impl IntoIterator<Item = Value>) -> Self {
        Script::Records(payloads.into_iter().collect())
    }

    pub fn fail(message: &str) -> Self {
        Script::Fail(message.to_string())
    }

    pub fn gated(gate: &Gate, then: Script) -> Self {
        Script::Gated(gate.clone(), Box::new(then))
    }

    pub fn sleep(duration: Duration, then: Script) -> Self {
        Script::Sleep(duration, Box::new(then))
    }

    fn play<'a>(&'a self, invocation: &'a Invocation) -> PluginFuture<'a> {
        Box::pin(async move {
            let result: PluginResult = match self {
                Script::Records(payloads) => Ok(PluginOutput {
                    records: payloads.iter().cloned().map(ProducedRecord::row).collect(),
                }),
                Script::Dumps(dumps) => {
                    let mut records = Vec::new();
                    for (payload, name, bytes) in dumps {
                        tokio::fs::write(invocation.output_dir.join(name), bytes)
                            .await
                            .map_err(|e| PluginFailure::new(format!("writing dump: {e}")))?;
                        records.push(ProducedRecord::with_file(payload.clone(), name.as_str()));
                    }
                    Ok(PluginOutput { records })
                }
                Script::Fail(message) => Err(PluginFailure::new(message.clone())),
                Script::Gated(gate, then) => {
                    gate.wait().await;
                    then.play(invocation).await
                }
                Script::Sleep(duration, then) => {
                    tokio::time::sleep(*duration).await;
                    then.play(invocation).await
                }
                Script::Panic(message) => panic!("{message}"),
            };
            result
        })
    }
}

/// Engine whose per-plugin behaviour is scripted by the test.
///
/// Each plugin has a queue of scripts; a call pops the front one, and the
/// last script stays in place for any further calls. Plugins without a
/// script succeed with zero records.
#[derive(Default)]
pub struct ScriptedEngine {
    scripts: Mutex<HashMap<String, Vec<Script>>>,
    calls: Mutex<Vec<Invocation>>,
    completed: Mutex<Vec<Invocation>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, plugin: &str, script: Script) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(plugin.to_string())
            .or_default()
            .push(script);
        self
    }

    pub fn with_script(self, plugin: &str, script: Script) -> Self {
        self.script(plugin, script);
        self
    }

    /// Every invocation seen so far, in call order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, plugin: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.plugin == plugin)
            .count()
    }

    /// Calls to `plugin` that ran their script to the end, i.e. were not
    /// stopped by a deadline, kill or shutdown.
    pub fn completed_count(&self, plugin: &str) -> usize {
        self.completed
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.plugin == plugin)
            .count()
    }

    fn next_script(&self, plugin: &str) -> Option<Script> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(plugin)?;
        if queue.len() > 1 {
            Some(queue.remove(0))
        } else {
            queue.first().cloned()
        }
    }
}

impl AnalysisEngine for ScriptedEngine {
    fn run<'a>(
        &'a self,
        descriptor: &'a PluginDescriptor,
        invocation: &'a Invocation,
    ) -> PluginFuture<'a> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(invocation.clone());
            let result = match self.next_script(descriptor.name) {
                Some(script) => script.play(invocation).await,
                None => Ok(PluginOutput::default()),
            };
            self.completed.lock().unwrap().push(invocation.clone());
            result
        })
    }
}
