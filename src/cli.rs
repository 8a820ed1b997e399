// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `pipedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pipedag",
    version,
    about = "Run dependency graphs of commands immediately, on a schedule, or when a source changes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the deployment file (TOML).
    ///
    /// Default: `Pipedag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Pipedag.toml")]
    pub config: String,

    /// Run every selected pipeline once, ignoring schedules and sources, then exit.
    #[arg(long)]
    pub once: bool,

    /// Only act on this pipeline. May be repeated.
    #[arg(long = "pipeline", value_name = "NAME")]
    pub pipelines: Vec<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PIPEDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse and validate, print pipelines and their run order, execute nothing.
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
