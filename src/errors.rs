// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Validation errors (`UnknownPlugin`, `InvalidParameters`, `InvalidState`, ...)
//! are returned synchronously to the caller. Failures that happen while a
//! plugin runs are *not* errors here: they are recorded on the task itself
//! (see [`crate::ledger::FailureKind`]).

use thiserror::Error;

use crate::types::{EvidenceId, TaskId};

#[derive(Error, Debug)]
pub enum MemtaskError {
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state for task {task_id}: {reason}")]
    InvalidState { task_id: TaskId, reason: String },

    #[error("Restart refused: attempt {attempt} would exceed max_attempts = {max}")]
    AttemptsExhausted { attempt: u32, max: u32 },

    #[error("Invalid parameters for plugin '{plugin}': {reason}")]
    InvalidParameters { plugin: String, reason: String },

    #[error("Plugin '{plugin}' is not a {expected} plugin")]
    WrongPluginKind { plugin: String, expected: String },

    #[error("Orchestrator is shutting down; task queue closed")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MemtaskError {
    pub fn evidence_not_found(evidence_id: EvidenceId) -> Self {
        MemtaskError::NotFound(format!("evidence {evidence_id}"))
    }

    pub fn task_not_found(task_id: TaskId) -> Self {
        MemtaskError::NotFound(format!("task {task_id}"))
    }

    pub fn invalid_state(task_id: TaskId, reason: impl Into<String>) -> Self {
        MemtaskError::InvalidState {
            task_id,
            reason: reason.into(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, MemtaskError>;
