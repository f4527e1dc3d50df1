// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `targetflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "targetflow",
    version,
    about = "Run declarative shell targets with needs, triggers and requirements.",
    long_about = None
)]
pub struct CliArgs {
    /// Targets to run, in order.
    #[arg(value_name = "TARGET", required = true)]
    pub targets: Vec<String>,

    /// Path to the config file (TOML).
    ///
    /// Default: `Targetflow.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Targetflow.toml")]
    pub config: String,

    /// Start the needs of each target concurrently.
    #[arg(long = "async")]
    pub run_async: bool,

    /// Allow a target to be started while it is already running.
    ///
    /// Overrides `[config].allow_multi_run`.
    #[arg(long)]
    pub allow_multi_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TARGETFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse, validate and print the expanded script lines of each target,
    /// without executing any commands.
    #[arg(long)]
    pub dry_run: bool,
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

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
