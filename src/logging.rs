// src/logging.rs

//! Logging setup for `memtask` using `tracing` + `tracing-subscriber`.
//!
//! The filter comes from, in order:
//! 1. `--log-level` CLI flag, applied to every target
//! 2. `MEMTASK_LOG`, a full `EnvFilter` directive such as
//!    `memtask=debug,memtask::exec=trace`
//! 3. `info`
//!
//! Logs go to stderr; stdout only carries JSON results.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "MEMTASK_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Initialise the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let (filter, rejected) = build_filter(cli_level, env.as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    if let Some(directive) = rejected {
        tracing::warn!(env = LOG_ENV, %directive, "ignoring invalid log filter; using info");
    }
    Ok(())
}

/// Resolve the filter. The second value is an env directive that failed to
/// parse, so it can be reported once logging is up.
fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> (EnvFilter, Option<String>) {
    if let Some(level) = cli_level {
        return (EnvFilter::new(level.directive()), None);
    }

    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directive) => match EnvFilter::try_new(directive) {
            Ok(filter) => (filter, None),
            Err(_) => (EnvFilter::new(DEFAULT_DIRECTIVE), Some(directive.to_string())),
        },
        None => (EnvFilter::new(DEFAULT_DIRECTIVE), None),
    }
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}
