// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::default_config_path;
use crate::types::{EvidenceId, TaskId};

/// Command-line arguments for `memtask`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "memtask",
    version,
    about = "Schedule and track memory-forensics plugin runs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Memtask.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path(), global = true)]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `MEMTASK_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the builtin plugin catalog as JSON.
    Plugins,

    /// Parse + validate the config and print a summary; run nothing.
    Check,

    /// Run one plugin against one evidence image and print the result.
    Run {
        #[arg(long, value_name = "ID")]
        evidence: EvidenceId,

        #[arg(long, value_name = "NAME")]
        plugin: String,

        /// Plugin parameter, repeatable: `--param pid=1234`.
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// List the tasks of one evidence image from the state snapshot.
    Tasks {
        #[arg(long, value_name = "ID")]
        evidence: EvidenceId,
    },

    /// Restart a task recorded in the state snapshot and wait for it.
    Restart {
        #[arg(long, value_name = "ID")]
        task: TaskId,

        /// Kill the task first if it is still pending or running.
        #[arg(long)]
        kill: bool,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_repeated_params() {
        let args = CliArgs::try_parse_from([
            "memtask", "run", "--evidence", "7", "--plugin", "proc.maps.dump", "--param",
            "pid=1234", "--param", "start=0x1000", "--param", "end=0x2000",
        ])
        .unwrap();

        match args.command {
            Command::Run { evidence, plugin, params } => {
                assert_eq!(evidence, 7);
                assert_eq!(plugin, "proc.maps.dump");
                assert_eq!(params.len(), 3);
                assert_eq!(params[0], ("pid".to_string(), "1234".to_string()));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn restart_parses_task_id_and_kill_flag() {
        let args =
            CliArgs::try_parse_from(["memtask", "--log-level", "debug", "restart", "--task", "12", "--kill"])
                .unwrap();
        assert!(matches!(args.command, Command::Restart { task: TaskId(12), kill: true }));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert_eq!(args.config, PathBuf::from("Memtask.toml"));
    }

    #[test]
    fn malformed_param_is_rejected() {
        let result = CliArgs::try_parse_from([
            "memtask", "run", "--evidence", "7", "--plugin", "handles", "--param", "pid",
        ]);
        assert!(result.is_err());
    }
}
