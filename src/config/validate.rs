// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use crate::config::model::{ConfigFile, OrchestratorSettings, RawConfigFile, RawOrchestratorSection};
use crate::errors::{MemtaskError, Result};
use crate::plugins::builtin_descriptors;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = MemtaskError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let orchestrator = validate_orchestrator(&raw.orchestrator)?;
        validate_engine(&raw)?;
        validate_evidence(&raw)?;
        Ok(ConfigFile::new_unchecked(orchestrator, raw.engine, raw.evidence))
    }
}

fn config_error(msg: impl Into<String>) -> MemtaskError {
    MemtaskError::ConfigError(msg.into())
}

fn validate_orchestrator(raw: &RawOrchestratorSection) -> Result<OrchestratorSettings> {
    if raw.workers == 0 {
        return Err(config_error("[orchestrator].workers must be >= 1 (got 0)"));
    }

    if raw.max_attempts == Some(0) {
        return Err(config_error("[orchestrator].max_attempts must be >= 1 (got 0)"));
    }

    let sweep_interval = parse_duration(&raw.sweep_interval)
        .map_err(|e| config_error(format!("invalid [orchestrator].sweep_interval: {e}")))?;
    if sweep_interval.is_zero() {
        return Err(config_error("[orchestrator].sweep_interval must be > 0"));
    }

    let task_deadline = raw
        .task_deadline
        .as_deref()
        .map(parse_duration)
        .transpose()
        .map_err(|e| config_error(format!("invalid [orchestrator].task_deadline: {e}")))?;
    if task_deadline.is_some_and(|d| d.is_zero()) {
        return Err(config_error("[orchestrator].task_deadline must be > 0"));
    }

    Ok(OrchestratorSettings {
        workers: raw.workers,
        task_deadline,
        sweep_interval,
        max_attempts: raw.max_attempts,
        dump_dir: raw.dump_dir.clone(),
        state_file: raw.state_file.clone(),
    })
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.program.trim().is_empty() {
        return Err(config_error("[engine].program must not be empty"));
    }

    let descriptors = builtin_descriptors();
    for (name, command) in &cfg.engine.plugins {
        let Some(descriptor) = descriptors.iter().find(|d| d.name == name.as_str()) else {
            return Err(config_error(format!(
                "[engine.plugins.{name}] does not match any known plugin"
            )));
        };
        for param in command.param_args.keys() {
            if !descriptor.params.iter().any(|p| p.name == param.as_str()) {
                return Err(config_error(format!(
                    "[engine.plugins.{name}].param_args references unknown parameter '{param}'"
                )));
            }
        }
    }
    Ok(())
}

fn validate_evidence(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for evidence in &cfg.evidence {
        if !seen.insert(evidence.id) {
            return Err(config_error(format!(
                "evidence id {} is declared more than once",
                evidence.id
            )));
        }
        if evidence.image.as_os_str().is_empty() {
            return Err(config_error(format!("evidence {} has an empty image path", evidence.id)));
        }
    }
    Ok(())
}

/// Parse durations like `"500ms"`, `"30s"`, `"5m"`, `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let seconds = |per_unit: u64| {
        value
            .checked_mul(per_unit)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large"))
    };

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => seconds(60),
        "h" => seconds(60 * 60),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{EvidenceConfig, PluginCommand};
    use proptest::prelude::*;
    use std::path::PathBuf;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration(" 5m ").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("3d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_duration_rejects_overflowing_values() {
        let err = parse_duration("5124095576030432h").unwrap_err();
        assert!(err.contains("too large"), "{err}");
        assert!(parse_duration("307445734561825861m").is_err());
        assert!(parse_duration("99999999999999999999s").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = ConfigFile::try_from(RawConfigFile::default()).unwrap();
        assert_eq!(cfg.orchestrator.workers, 4);
        assert_eq!(cfg.orchestrator.sweep_interval, Duration::from_secs(30));
        assert!(cfg.orchestrator.task_deadline.is_none());
    }

    #[test]
    fn rejects_zero_workers_and_attempts() {
        let mut raw = RawConfigFile::default();
        raw.orchestrator.workers = 0;
        assert!(matches!(ConfigFile::try_from(raw), Err(MemtaskError::ConfigError(_))));

        let mut raw = RawConfigFile::default();
        raw.orchestrator.max_attempts = Some(0);
        assert!(matches!(ConfigFile::try_from(raw), Err(MemtaskError::ConfigError(_))));
    }

    #[test]
    fn rejects_unknown_engine_plugin_and_param() {
        let mut raw = RawConfigFile::default();
        raw.engine.plugins.insert("malfind".into(), PluginCommand::default());
        let err = ConfigFile::try_from(raw).unwrap_err();
        assert!(err.to_string().contains("malfind"));

        let mut raw = RawConfigFile::default();
        let mut command = PluginCommand::default();
        command.param_args.insert("path".into(), vec!["{path}".into()]);
        raw.engine.plugins.insert("handles".into(), command);
        let err = ConfigFile::try_from(raw).unwrap_err();
        assert!(err.to_string().contains("'path'"));
    }

    #[test]
    fn rejects_duplicate_evidence() {
        let mut raw = RawConfigFile::default();
        for _ in 0..2 {
            raw.evidence.push(EvidenceConfig {
                id: 7,
                image: PathBuf::from("/cases/7.lime"),
            });
        }
        let err = ConfigFile::try_from(raw).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    proptest! {
        #[test]
        fn seconds_parse_to_exact_duration(n in 0u64..1_000_000) {
            prop_assert_eq!(parse_duration(&format!("{n}s")).unwrap(), Duration::from_secs(n));
        }
    }
}
