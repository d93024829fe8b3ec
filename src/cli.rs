// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::HashAlgorithm;

/// Command-line arguments for `reprod`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "reprod",
    version,
    about = "Build only what changed in a content-addressed data pipeline.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `REPROD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Build the pipeline's targets, skipping everything already available.
    Build(BuildArgs),
    /// Verify object digests from `location [algo:value ...]` lines on stdin.
    Verify(VerifyArgs),
}

#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
    /// Path to the pipeline file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Pipeline.toml")]
    pub config: String,

    /// Override `[config].run_name`.
    #[arg(long, value_name = "NAME")]
    pub run_name: Option<String>,

    /// Override `[config].max_attempts`.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,

    /// Print dependency order and build order without running anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct VerifyArgs {
    /// Number of requests verified concurrently.
    #[arg(long, value_name = "THREADS", default_value_t = 1)]
    pub threads: usize,

    /// Delete source objects whose digests do not match.
    #[arg(long)]
    pub delete_mismatch: bool,

    /// Also compute and record this digest (repeatable).
    #[arg(long = "extra-digest", value_name = "ALGO", value_parser = parse_algorithm)]
    pub extra_digests: Vec<HashAlgorithm>,

    /// Directory relative locations resolve against.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub storage_root: String,

    /// Read chunk size in bytes (default 16 MiB).
    #[arg(long, value_name = "BYTES")]
    pub chunk_size: Option<usize>,
}

fn parse_algorithm(s: &str) -> Result<HashAlgorithm, String> {
    s.parse()
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
