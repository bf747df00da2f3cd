#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use memtask::config::{
    ConfigFile, EngineConfig, EvidenceConfig, OrchestratorSettings, PluginCommand, RawConfigFile,
};
use memtask::types::EvidenceId;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.orchestrator.workers = workers;
        self
    }

    pub fn task_deadline(mut self, deadline: &str) -> Self {
        self.config.orchestrator.task_deadline = Some(deadline.to_string());
        self
    }

    pub fn sweep_interval(mut self, interval: &str) -> Self {
        self.config.orchestrator.sweep_interval = interval.to_string();
        self
    }

    pub fn max_attempts(mut self, max: u32) -> Self {
        self.config.orchestrator.max_attempts = Some(max);
        self
    }

    pub fn dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.orchestrator.dump_dir = dir.into();
        self
    }

    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.orchestrator.state_file = Some(path.into());
        self
    }

    pub fn evidence(mut self, id: EvidenceId, image: impl AsRef<Path>) -> Self {
        self.config.evidence.push(EvidenceConfig {
            id,
            image: image.as_ref().to_path_buf(),
        });
        self
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn engine_plugin(mut self, name: &str, args: &[&str]) -> Self {
        self.config.engine.plugins.insert(
            name.to_string(),
            PluginCommand {
                args: args.iter().map(|s| s.to_string()).collect(),
                param_args: Default::default(),
            },
        );
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrator settings suited to tests: two workers, no deadline, and a
/// sweep interval long enough that tests trigger reconciliation by hand.
pub fn test_settings(dump_dir: impl Into<PathBuf>) -> OrchestratorSettings {
    OrchestratorSettings {
        workers: 2,
        task_deadline: None,
        sweep_interval: Duration::from_secs(3600),
        max_attempts: None,
        dump_dir: dump_dir.into(),
        state_file: None,
    }
}
