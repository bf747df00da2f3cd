// src/plugins/descriptor.rs

//! Static plugin metadata: kind, parameters and output schema.

use std::fmt;

use serde::Serialize;

/// Broad category of a plugin, which determines how its output is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginKind {
    Enumeration,
    Timeline,
    DumpProcess,
    DumpFile,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginKind::Enumeration => "enumeration",
            PluginKind::Timeline => "timeline",
            PluginKind::DumpProcess => "dump-process",
            PluginKind::DumpFile => "dump-file",
        };
        f.write_str(s)
    }
}

/// What a parameter value must look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Decimal process id.
    Pid,
    /// Virtual address, hex with optional `0x` prefix.
    Address,
    /// Path inside the evidence image.
    Path,
}

/// One accepted parameter of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Column names a plugin emits in each record payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSchema {
    pub fields: Vec<&'static str>,
}

impl OutputSchema {
    pub fn new(fields: &[&'static str]) -> Self {
        Self {
            fields: fields.to_vec(),
        }
    }

    /// Whether records of this schema can be joined on a process id.
    pub fn has_pid(&self) -> bool {
        self.fields.iter().any(|f| f.eq_ignore_ascii_case("pid"))
    }
}

/// Immutable description of a plugin, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDescriptor {
    pub name: &'static str,
    pub kind: PluginKind,
    pub produces_file: bool,
    pub params: Vec<ParamSpec>,
}
