// src/exec/command.rs

//! External-command analysis engine.
//!
//! Runs the configured forensic tool (Volatility-style CLI) once per task,
//! with placeholders in the argument templates filled from the invocation:
//!
//! - `{image}`: evidence image path
//! - `{output_dir}`: the task's dump directory
//! - `{task_id}`, `{evidence_id}`
//! - `{<param>}`: any normalized task parameter
//!
//! The tool must print a JSON array of rows on stdout. Nested rows under
//! `__children` are flattened, and a dump plugin's `File output` column is
//! turned into a file reference.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, PluginCommand};
use crate::plugins::catalog::FILE_OUTPUT_FIELD;
use crate::plugins::{
    AnalysisEngine, Invocation, PluginDescriptor, PluginFailure, PluginFuture, PluginOutput,
    ProducedRecord,
};

const CHILDREN_FIELD: &str = "__children";

/// Values the tool writes into `File output` when nothing was dumped.
const NO_FILE_MARKERS: &[&str] = &["Disabled", "Error outputting file"];

/// Keep at most this many bytes of stderr in a failure message.
const STDERR_TAIL: usize = 2048;

#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    base_args: Vec<String>,
    plugins: BTreeMap<String, PluginCommand>,
}

impl CommandEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            base_args: config.base_args.clone(),
            plugins: config.plugins.clone(),
        }
    }

    /// Full argument list for one invocation.
    pub fn build_args(&self, invocation: &Invocation) -> Result<Vec<String>> {
        let Some(command) = self.plugins.get(&invocation.plugin) else {
            bail!("no engine command configured for plugin '{}'", invocation.plugin);
        };

        let vars = placeholders(invocation);
        let mut args = Vec::new();
        for arg in self.base_args.iter().chain(&command.args) {
            args.push(substitute(arg, &vars)?);
        }
        // Optional parameters only contribute their flags when present.
        for (param, templates) in &command.param_args {
            if invocation.parameters.contains_key(param) {
                for arg in templates {
                    args.push(substitute(arg, &vars)?);
                }
            }
        }
        Ok(args)
    }

    async fn run_inner(
        &self,
        descriptor: &PluginDescriptor,
        invocation: &Invocation,
    ) -> Result<PluginOutput> {
        let args = self.build_args(invocation)?;
        info!(program = %self.program, ?args, "starting engine process");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if descriptor.produces_file {
            // Dump plugins write relative file names into the task dir.
            command.current_dir(&invocation.output_dir);
        }

        let child = command
            .spawn()
            .with_context(|| format!("spawning engine process '{}'", self.program))?;
        let pid = child.id();
        debug!(?pid, "engine process spawned");

        // Dropping this future (deadline, kill, shutdown) drops the child,
        // which kills the process.
        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("waiting for engine process '{}'", self.program))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            debug!("stderr: {}", line);
        }

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            bail!("engine exited with code {code}: {}", tail(stderr.trim()));
        }

        let rows: Value =
            serde_json::from_slice(&output.stdout).context("parsing engine JSON output")?;
        parse_rows(descriptor, rows)
    }
}

impl AnalysisEngine for CommandEngine {
    fn run<'a>(
        &'a self,
        descriptor: &'a PluginDescriptor,
        invocation: &'a Invocation,
    ) -> PluginFuture<'a> {
        Box::pin(async move {
            self.run_inner(descriptor, invocation).await.map_err(|err| {
                warn!(plugin = descriptor.name, error = %format!("{err:#}"), "engine run failed");
                PluginFailure::new(format!("{err:#}"))
            })
        })
    }
}

fn placeholders(invocation: &Invocation) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("image".to_string(), invocation.evidence.image.display().to_string());
    vars.insert("output_dir".to_string(), invocation.output_dir.display().to_string());
    vars.insert("task_id".to_string(), invocation.task_id.to_string());
    vars.insert("evidence_id".to_string(), invocation.evidence.id.to_string());
    for (key, value) in &invocation.parameters {
        vars.insert(key.clone(), value.clone());
    }
    vars
}

/// Replace every `{name}` in `template`. Unknown names are an error.
fn substitute(template: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            bail!("unterminated placeholder in '{template}'");
        };
        let name = &after[..close];
        let Some(value) = vars.get(name) else {
            bail!("unknown placeholder '{{{name}}}' in '{template}'");
        };
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn tail(text: &str) -> &str {
    if text.len() <= STDERR_TAIL {
        return text;
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Turn the engine's JSON array into produced records.
pub fn parse_rows(descriptor: &PluginDescriptor, rows: Value) -> Result<PluginOutput> {
    let Value::Array(rows) = rows else {
        bail!("engine output is not a JSON array");
    };

    let mut flat = Vec::new();
    for row in rows {
        flatten(row, &mut flat)?;
    }

    let records = flat
        .into_iter()
        .map(|row| {
            let file = if descriptor.produces_file {
                dump_file(&row)
            } else {
                None
            };
            ProducedRecord {
                payload: Value::Object(row),
                file,
            }
        })
        .collect();

    Ok(PluginOutput { records })
}

fn flatten(row: Value, out: &mut Vec<Map<String, Value>>) -> Result<()> {
    let Value::Object(mut row) = row else {
        bail!("engine row is not a JSON object");
    };
    let children = row.remove(CHILDREN_FIELD);
    out.push(row);

    if let Some(Value::Array(children)) = children {
        for child in children {
            flatten(child, out)?;
        }
    }
    Ok(())
}

fn dump_file(row: &Map<String, Value>) -> Option<PathBuf> {
    let name = row.get(FILE_OUTPUT_FIELD)?.as_str()?.trim();
    if name.is_empty() || NO_FILE_MARKERS.contains(&name) {
        return None;
    }
    Some(PathBuf::from(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceRef;
    use crate::plugins::catalog::{HANDLES, PSLIST_DUMP};
    use crate::plugins::{ParamKind, ParamSpec, PluginKind};
    use crate::types::{Parameters, TaskId};
    use serde_json::json;

    fn engine() -> CommandEngine {
        let mut plugins = BTreeMap::new();
        plugins.insert(
            HANDLES.to_string(),
            PluginCommand {
                args: vec!["-f".into(), "{image}".into(), "linux.lsof.Lsof".into()],
                param_args: BTreeMap::from([(
                    "pid".to_string(),
                    vec!["--pid".to_string(), "{pid}".to_string()],
                )]),
            },
        );
        CommandEngine::new(&EngineConfig {
            program: "vol".into(),
            base_args: vec!["-q".into(), "-r".into(), "json".into(), "-o".into(), "{output_dir}".into()],
            plugins,
        })
    }

    fn invocation(plugin: &str, parameters: Parameters) -> Invocation {
        Invocation {
            task_id: TaskId(3),
            evidence: EvidenceRef {
                id: 7,
                image: PathBuf::from("/cases/7/mem.lime"),
            },
            plugin: plugin.to_string(),
            parameters,
            output_dir: PathBuf::from("/dumps/evidence-7/task-3"),
        }
    }

    fn dump_descriptor() -> PluginDescriptor {
        PluginDescriptor {
            name: PSLIST_DUMP,
            kind: PluginKind::DumpProcess,
            produces_file: true,
            params: vec![ParamSpec::required("pid", ParamKind::Pid)],
        }
    }

    #[test]
    fn build_args_fills_placeholders_and_optional_params() {
        let engine = engine();

        let args = engine.build_args(&invocation(HANDLES, Parameters::new())).unwrap();
        assert_eq!(
            args,
            vec!["-q", "-r", "json", "-o", "/dumps/evidence-7/task-3", "-f", "/cases/7/mem.lime", "linux.lsof.Lsof"]
        );

        let params = Parameters::from([("pid".to_string(), "1234".to_string())]);
        let args = engine.build_args(&invocation(HANDLES, params)).unwrap();
        assert_eq!(&args[args.len() - 2..], ["--pid", "1234"]);
    }

    #[test]
    fn build_args_rejects_unconfigured_plugin() {
        let err = engine()
            .build_args(&invocation("timeliner", Parameters::new()))
            .unwrap_err();
        assert!(err.to_string().contains("timeliner"));
    }

    #[test]
    fn substitute_rejects_unknown_placeholder() {
        let vars = BTreeMap::new();
        assert!(substitute("{nope}", &vars).is_err());
        assert!(substitute("{open", &vars).is_err());
        assert_eq!(substitute("plain", &vars).unwrap(), "plain");
    }

    #[test]
    fn parse_rows_flattens_children_and_maps_dump_files() {
        let rows = json!([
            {
                "PID": 1, "COMM": "systemd", "File output": "pid.1.dmp",
                "__children": [
                    { "PID": 1234, "COMM": "bash", "File output": "Disabled", "__children": [] }
                ]
            },
            { "PID": 99, "COMM": "sshd", "File output": "Error outputting file" }
        ]);

        let output = parse_rows(&dump_descriptor(), rows).unwrap();
        assert_eq!(output.records.len(), 3);
        assert_eq!(output.records[0].file, Some(PathBuf::from("pid.1.dmp")));
        assert_eq!(output.records[1].payload["PID"], 1234);
        assert!(output.records[1].payload.get(CHILDREN_FIELD).is_none());
        assert!(output.records[1].file.is_none());
        assert!(output.records[2].file.is_none());
    }

    #[test]
    fn parse_rows_rejects_non_array_output() {
        assert!(parse_rows(&dump_descriptor(), json!({"PID": 1})).is_err());
        assert!(parse_rows(&dump_descriptor(), json!([1, 2])).is_err());
    }

    #[test]
    fn empty_array_is_a_valid_result() {
        let output = parse_rows(&dump_descriptor(), json!([])).unwrap();
        assert!(output.records.is_empty());
    }

    #[test]
    fn tail_keeps_the_end_of_long_messages() {
        let long = "x".repeat(STDERR_TAIL + 10) + "END";
        assert!(tail(&long).ends_with("END"));
        assert_eq!(tail(&long).len(), STDERR_TAIL);
    }
}
