// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::evidence::StaticEvidenceCatalog;
use crate::types::EvidenceId;

/// Configuration exactly as read from TOML, before validation.
///
/// ```toml
/// [orchestrator]
/// workers = 4
/// task_deadline = "2h"
/// sweep_interval = "30s"
/// dump_dir = "dumps"
///
/// [engine]
/// program = "vol"
///
/// [engine.plugins.pslist]
/// args = ["-f", "{image}", "linux.pslist.PsList"]
///
/// [[evidence]]
/// id = 7
/// image = "/cases/7/memory.lime"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub orchestrator: RawOrchestratorSection,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub evidence: Vec<EvidenceConfig>,
}

/// `[orchestrator]` section with durations still as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOrchestratorSection {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-task deadline, e.g. `"2h"`. No deadline when absent.
    #[serde(default)]
    pub task_deadline: Option<String>,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,

    /// Cap on attempts per dedup key; unbounded when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default = "default_dump_dir")]
    pub dump_dir: PathBuf,

    /// JSON state snapshot; persistence is off when absent.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

fn default_workers() -> usize {
    4
}

fn default_sweep_interval() -> String {
    "30s".to_string()
}

fn default_dump_dir() -> PathBuf {
    PathBuf::from("dumps")
}

impl Default for RawOrchestratorSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            task_deadline: None,
            sweep_interval: default_sweep_interval(),
            max_attempts: None,
            dump_dir: default_dump_dir(),
            state_file: None,
        }
    }
}

/// `[engine]` section: how to run the external analysis tool.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before every plugin's own arguments.
    #[serde(default = "default_base_args")]
    pub base_args: Vec<String>,

    /// `[engine.plugins.<name>]` tables.
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginCommand>,
}

fn default_program() -> String {
    "vol".to_string()
}

fn default_base_args() -> Vec<String> {
    ["-q", "-r", "json"].iter().map(|s| s.to_string()).collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            base_args: default_base_args(),
            plugins: BTreeMap::new(),
        }
    }
}

/// Argument templates for one plugin.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct PluginCommand {
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra arguments appended only when the named parameter is present.
    #[serde(default)]
    pub param_args: BTreeMap<String, Vec<String>>,
}

/// `[[evidence]]` entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EvidenceConfig {
    pub id: EvidenceId,
    pub image: PathBuf,
}

/// Validated `[orchestrator]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub workers: usize,
    pub task_deadline: Option<Duration>,
    pub sweep_interval: Duration,
    pub max_attempts: Option<u32>,
    pub dump_dir: PathBuf,
    pub state_file: Option<PathBuf>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            task_deadline: None,
            sweep_interval: Duration::from_secs(30),
            max_attempts: None,
            dump_dir: default_dump_dir(),
            state_file: None,
        }
    }
}

/// Validated configuration. Only obtainable through
/// `ConfigFile::try_from(RawConfigFile)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub orchestrator: OrchestratorSettings,
    pub engine: EngineConfig,
    pub evidence: Vec<EvidenceConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        orchestrator: OrchestratorSettings,
        engine: EngineConfig,
        evidence: Vec<EvidenceConfig>,
    ) -> Self {
        Self {
            orchestrator,
            engine,
            evidence,
        }
    }

    pub fn evidence_catalog(&self) -> StaticEvidenceCatalog {
        self.evidence
            .iter()
            .fold(StaticEvidenceCatalog::new(), |catalog, e| {
                catalog.with_image(e.id, e.image.clone())
            })
    }

    /// Make relative paths relative to `root` (the config file's directory).
    pub fn resolve_paths(&mut self, root: &std::path::Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };
        resolve(&mut self.orchestrator.dump_dir);
        if let Some(state_file) = &mut self.orchestrator.state_file {
            resolve(state_file);
        }
        for evidence in &mut self.evidence {
            resolve(&mut evidence.image);
        }
    }
}
