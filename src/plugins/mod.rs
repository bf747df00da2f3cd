// src/plugins/mod.rs

//! Plugin catalog and execution contract.
//!
//! - [`descriptor`] holds the static metadata of a plugin.
//! - [`params`] validates and normalizes submitted parameters.
//! - [`catalog`] defines the builtin plugins (pslist, handles, timeliner,
//!   process/file dumps).
//! - [`registry`] maps plugin names to their implementation; it is built
//!   once at startup and never mutated.
//!
//! The forensic analysis itself is opaque to the orchestrator: every builtin
//! plugin delegates to an [`AnalysisEngine`], which production code backs
//! with an external command (`exec::CommandEngine`) and tests back with a
//! scripted fake.

pub mod catalog;
pub mod descriptor;
pub mod params;
pub mod registry;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;

use crate::errors::Result;
use crate::evidence::EvidenceRef;
use crate::types::{Parameters, TaskId};

pub use catalog::{BuiltinPlugin, builtin_descriptors, builtin_registry};
pub use descriptor::{OutputSchema, ParamKind, ParamSpec, PluginDescriptor, PluginKind};
pub use registry::PluginRegistry;

/// Everything a plugin needs to run one task.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub task_id: TaskId,
    pub evidence: EvidenceRef,
    pub plugin: String,
    pub parameters: Parameters,
    /// Directory owned by this task. Dump files must be written here.
    pub output_dir: PathBuf,
}

/// One output row, optionally pointing at a dump file inside
/// [`Invocation::output_dir`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedRecord {
    pub payload: Value,
    pub file: Option<PathBuf>,
}

impl ProducedRecord {
    pub fn row(payload: Value) -> Self {
        Self {
            payload,
            file: None,
        }
    }

    pub fn with_file(payload: Value, file: impl Into<PathBuf>) -> Self {
        Self {
            payload,
            file: Some(file.into()),
        }
    }
}

/// Result of a successful plugin run. Zero records is a valid result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginOutput {
    pub records: Vec<ProducedRecord>,
}

/// The plugin ran and reported that it could not do its job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct PluginFailure {
    pub message: String,
}

impl PluginFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type PluginResult = std::result::Result<PluginOutput, PluginFailure>;

/// In-flight plugin invocation. Dropping it must stop the underlying
/// analysis.
pub type PluginFuture<'a> = Pin<Box<dyn Future<Output = PluginResult> + Send + 'a>>;

/// Execution contract of one registered plugin.
///
/// `execute` may run for seconds to hours. The worker drives it on its own
/// Tokio task and aborts that task on deadline, kill or shutdown.
pub trait Plugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    fn output_schema(&self) -> &OutputSchema;

    /// Validate submitted parameters and return their normalized form.
    fn validate_parameters(&self, params: &Parameters) -> Result<Parameters>;

    fn execute<'a>(&'a self, invocation: &'a Invocation) -> PluginFuture<'a>;

    fn name(&self) -> &'static str {
        self.descriptor().name
    }
}

/// The opaque forensic engine that actually analyses memory images.
pub trait AnalysisEngine: Send + Sync {
    fn run<'a>(
        &'a self,
        descriptor: &'a PluginDescriptor,
        invocation: &'a Invocation,
    ) -> PluginFuture<'a>;
}
