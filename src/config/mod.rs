// src/config/mod.rs

//! Configuration loading and validation for memtask.
//!
//! - `model.rs`: the TOML-backed data model (raw and validated forms).
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: `RawConfigFile -> ConfigFile` with semantic checks.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, EngineConfig, EvidenceConfig, OrchestratorSettings, PluginCommand, RawConfigFile,
    RawOrchestratorSection,
};
pub use validate::parse_duration;
