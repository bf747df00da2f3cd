// src/plugins/catalog.rs

//! Builtin plugin catalog.

use std::sync::Arc;

use crate::errors::{MemtaskError, Result};
use crate::plugins::descriptor::{OutputSchema, ParamKind, ParamSpec, PluginDescriptor, PluginKind};
use crate::plugins::params::{normalize, parse_address};
use crate::plugins::registry::PluginRegistry;
use crate::plugins::{AnalysisEngine, Invocation, Plugin, PluginFuture};
use crate::types::Parameters;

pub const PSLIST: &str = "pslist";
pub const HANDLES: &str = "handles";
pub const TIMELINER: &str = "timeliner";
pub const PSLIST_DUMP: &str = "pslist.dump";
pub const MAPS_DUMP: &str = "proc.maps.dump";
pub const DUMPFILES: &str = "dumpfiles";

/// Column carrying the name of the dump file written by a dump plugin.
pub const FILE_OUTPUT_FIELD: &str = "File output";

/// Cross-parameter check run after per-field normalization.
type ExtraCheck = fn(&Parameters) -> std::result::Result<(), String>;

/// A catalog entry whose analysis is delegated to an [`AnalysisEngine`].
pub struct BuiltinPlugin {
    descriptor: PluginDescriptor,
    schema: OutputSchema,
    extra_check: Option<ExtraCheck>,
    engine: Arc<dyn AnalysisEngine>,
}

impl BuiltinPlugin {
    fn new(
        descriptor: PluginDescriptor,
        schema: OutputSchema,
        engine: Arc<dyn AnalysisEngine>,
    ) -> Self {
        Self {
            descriptor,
            schema,
            extra_check: None,
            engine,
        }
    }

    fn with_check(mut self, check: ExtraCheck) -> Self {
        self.extra_check = Some(check);
        self
    }
}

impl Plugin for BuiltinPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn output_schema(&self) -> &OutputSchema {
        &self.schema
    }

    fn validate_parameters(&self, params: &Parameters) -> Result<Parameters> {
        let normalized = normalize(&self.descriptor, params)?;
        if let Some(check) = self.extra_check {
            check(&normalized).map_err(|reason| MemtaskError::InvalidParameters {
                plugin: self.descriptor.name.to_string(),
                reason,
            })?;
        }
        Ok(normalized)
    }

    fn execute<'a>(&'a self, invocation: &'a Invocation) -> PluginFuture<'a> {
        self.engine.run(&self.descriptor, invocation)
    }
}

fn check_address_range(params: &Parameters) -> std::result::Result<(), String> {
    let start = params.get("start").and_then(|s| parse_address(s));
    let end = params.get("end").and_then(|s| parse_address(s));
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(()),
        (Some(_), Some(_)) => Err("memory range start must be below end".to_string()),
        _ => Err("memory range requires both start and end".to_string()),
    }
}

/// One catalog row before it is bound to an engine.
struct CatalogEntry {
    descriptor: PluginDescriptor,
    schema: OutputSchema,
    extra_check: Option<ExtraCheck>,
}

fn entry(
    name: &'static str,
    kind: PluginKind,
    produces_file: bool,
    params: Vec<ParamSpec>,
    fields: &[&'static str],
) -> CatalogEntry {
    CatalogEntry {
        descriptor: PluginDescriptor {
            name,
            kind,
            produces_file,
            params,
        },
        schema: OutputSchema::new(fields),
        extra_check: None,
    }
}

fn catalog() -> Vec<CatalogEntry> {
    vec![
        entry(
            PSLIST,
            PluginKind::Enumeration,
            false,
            vec![],
            &["OFFSET (V)", "PID", "TID", "PPID", "COMM"],
        ),
        entry(
            HANDLES,
            PluginKind::Enumeration,
            false,
            vec![ParamSpec::optional("pid", ParamKind::Pid)],
            &["PID", "TID", "Process", "FD", "Path"],
        ),
        entry(
            TIMELINER,
            PluginKind::Timeline,
            false,
            vec![],
            &[
                "Plugin",
                "Description",
                "Created Date",
                "Modified Date",
                "Accessed Date",
                "Changed Date",
            ],
        ),
        entry(
            PSLIST_DUMP,
            PluginKind::DumpProcess,
            true,
            vec![ParamSpec::required("pid", ParamKind::Pid)],
            &["PID", "PPID", "COMM", FILE_OUTPUT_FIELD],
        ),
        CatalogEntry {
            extra_check: Some(check_address_range),
            ..entry(
                MAPS_DUMP,
                PluginKind::DumpProcess,
                true,
                vec![
                    ParamSpec::required("pid", ParamKind::Pid),
                    ParamSpec::required("start", ParamKind::Address),
                    ParamSpec::required("end", ParamKind::Address),
                ],
                &["PID", "Process", "Start", "End", "Flags", FILE_OUTPUT_FIELD],
            )
        },
        entry(
            DUMPFILES,
            PluginKind::DumpFile,
            true,
            vec![ParamSpec::required("path", ParamKind::Path)],
            &["Path", "INode", FILE_OUTPUT_FIELD],
        ),
    ]
}

/// Descriptors of every builtin plugin, in catalog order.
pub fn builtin_descriptors() -> Vec<PluginDescriptor> {
    catalog().into_iter().map(|e| e.descriptor).collect()
}

/// Build the registry of all builtin plugins, backed by `engine`.
pub fn builtin_registry(engine: Arc<dyn AnalysisEngine>) -> PluginRegistry {
    let plugins: Vec<Arc<dyn Plugin>> = catalog()
        .into_iter()
        .map(|entry| {
            let plugin = BuiltinPlugin::new(entry.descriptor, entry.schema, Arc::clone(&engine));
            let plugin = match entry.extra_check {
                Some(check) => plugin.with_check(check),
                None => plugin,
            };
            Arc::new(plugin) as Arc<dyn Plugin>
        })
        .collect();

    PluginRegistry::new(plugins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{PluginFailure, PluginResult};

    struct NoopEngine;

    impl AnalysisEngine for NoopEngine {
        fn run<'a>(&'a self, _: &'a PluginDescriptor, _: &'a Invocation) -> PluginFuture<'a> {
            Box::pin(async { PluginResult::Err(PluginFailure::new("noop")) })
        }
    }

    fn registry() -> PluginRegistry {
        builtin_registry(Arc::new(NoopEngine))
    }

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn catalog_has_expected_kinds() {
        let reg = registry();
        assert_eq!(reg.get(TIMELINER).unwrap().descriptor().kind, PluginKind::Timeline);
        assert!(reg.get(DUMPFILES).unwrap().descriptor().produces_file);
        assert!(!reg.get(PSLIST).unwrap().descriptor().produces_file);
        assert!(reg.get(HANDLES).unwrap().output_schema().has_pid());
        assert!(!reg.get(TIMELINER).unwrap().output_schema().has_pid());
    }

    #[test]
    fn maps_dump_requires_ordered_range() {
        let reg = registry();
        let maps = reg.get(MAPS_DUMP).unwrap();

        let ok = maps
            .validate_parameters(&params(&[("pid", "1"), ("start", "0x1000"), ("end", "0x2000")]))
            .unwrap();
        assert_eq!(ok.get("end").map(String::as_str), Some("0x2000"));

        let err = maps
            .validate_parameters(&params(&[("pid", "1"), ("start", "0x2000"), ("end", "0x1000")]))
            .unwrap_err();
        assert!(err.to_string().contains("start must be below end"));
    }

    #[test]
    fn descriptors_follow_registry_order() {
        let names: Vec<_> = builtin_descriptors().iter().map(|d| d.name).collect();
        assert_eq!(names, registry().names().collect::<Vec<_>>());
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn dumpfiles_requires_path() {
        let reg = registry();
        let err = reg
            .get(DUMPFILES)
            .unwrap()
            .validate_parameters(&Parameters::new())
            .unwrap_err();
        assert!(matches!(err, MemtaskError::InvalidParameters { .. }));
    }
}
