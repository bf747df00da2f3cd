// src/plugins/params.rs

//! Parameter validation and normalization.
//!
//! Normalized parameters are what the dedup key is computed over, so two
//! spellings of the same request (`pid = "0042"` vs `pid = "42"`,
//! `start = "0xDEAD"` vs `start = "dead"`) collapse into one task.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{MemtaskError, Result};
use crate::plugins::descriptor::{ParamKind, ParamSpec, PluginDescriptor};
use crate::types::Parameters;

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:0[xX])?([0-9a-fA-F]{1,16})$").expect("address regex is valid")
});

/// Check `params` against the descriptor's [`ParamSpec`]s and return the
/// normalized map.
pub fn normalize(descriptor: &PluginDescriptor, params: &Parameters) -> Result<Parameters> {
    let invalid = |reason: String| MemtaskError::InvalidParameters {
        plugin: descriptor.name.to_string(),
        reason,
    };

    for key in params.keys() {
        if !descriptor.params.iter().any(|spec| spec.name == key) {
            return Err(invalid(format!("unexpected parameter '{key}'")));
        }
    }

    let mut normalized = Parameters::new();
    for spec in &descriptor.params {
        match params.get(spec.name) {
            Some(raw) => {
                let value = normalize_value(spec, raw).map_err(invalid)?;
                normalized.insert(spec.name.to_string(), value);
            }
            None if spec.required => {
                return Err(invalid(format!("missing required parameter '{}'", spec.name)));
            }
            None => {}
        }
    }

    Ok(normalized)
}

fn normalize_value(spec: &ParamSpec, raw: &str) -> std::result::Result<String, String> {
    let raw = raw.trim();
    match spec.kind {
        ParamKind::Pid => raw
            .parse::<u32>()
            .map(|pid| pid.to_string())
            .map_err(|e| format!("parameter '{}' is not a valid pid ('{raw}'): {e}", spec.name)),
        ParamKind::Address => parse_address(raw)
            .map(|addr| format!("{addr:#x}"))
            .ok_or_else(|| format!("parameter '{}' is not a hex address ('{raw}')", spec.name)),
        ParamKind::Path => {
            if raw.is_empty() {
                Err(format!("parameter '{}' must not be empty", spec.name))
            } else {
                Ok(raw.to_string())
            }
        }
    }
}

/// Parse a hex address with optional `0x` prefix.
pub fn parse_address(raw: &str) -> Option<u64> {
    let caps = ADDRESS_RE.captures(raw.trim())?;
    u64::from_str_radix(&caps[1], 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::descriptor::PluginKind;

    fn descriptor() -> PluginDescriptor {
        PluginDescriptor {
            name: "proc.maps.dump",
            kind: PluginKind::DumpProcess,
            produces_file: true,
            params: vec![
                ParamSpec::required("pid", ParamKind::Pid),
                ParamSpec::required("start", ParamKind::Address),
                ParamSpec::optional("path", ParamKind::Path),
            ],
        }
    }

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn normalizes_pid_and_address_spellings() {
        let out = normalize(&descriptor(), &params(&[("pid", " 0042 "), ("start", "DEADbeef")])).unwrap();
        assert_eq!(out.get("pid").map(String::as_str), Some("42"));
        assert_eq!(out.get("start").map(String::as_str), Some("0xdeadbeef"));
        assert!(!out.contains_key("path"));
    }

    #[test]
    fn rejects_unknown_and_missing_parameters() {
        let err = normalize(&descriptor(), &params(&[("pid", "1"), ("start", "0x1"), ("bogus", "x")]))
            .unwrap_err();
        assert!(matches!(err, MemtaskError::InvalidParameters { .. }));

        let err = normalize(&descriptor(), &params(&[("pid", "1")])).unwrap_err();
        assert!(err.to_string().contains("missing required parameter 'start'"));
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(normalize(&descriptor(), &params(&[("pid", "-1"), ("start", "0x1")])).is_err());
        assert!(normalize(&descriptor(), &params(&[("pid", "1"), ("start", "0xZZ")])).is_err());
        assert!(
            normalize(&descriptor(), &params(&[("pid", "1"), ("start", "0x1"), ("path", "  ")])).is_err()
        );
    }
}
