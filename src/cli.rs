// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `gpusched`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "gpusched",
    version,
    about = "Drive a synthetic workload through the GPU job scheduler on simulated hardware.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Gpusched.toml` in the current working directory if it
    /// exists, built-in defaults otherwise.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `GPUSCHED_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the resolved configuration, but don't run
    /// anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Override the in-flight ceiling of every engine.
    #[arg(long, value_name = "N")]
    pub hw_submission_limit: Option<usize>,

    /// Override the per-job timeout of every engine (0 disables it).
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Number of concurrent submission contexts.
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub contexts: usize,

    /// Jobs submitted per context.
    #[arg(long, value_name = "N", default_value_t = 32)]
    pub jobs: usize,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let args = CliArgs::try_parse_from(["gpusched"]).unwrap();
        assert_eq!((args.contexts, args.jobs), (4, 32));
        assert!(args.config.is_none());

        let args = CliArgs::try_parse_from([
            "gpusched",
            "--hw-submission-limit",
            "1",
            "--timeout-ms",
            "0",
            "--log-level",
            "debug",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.hw_submission_limit, Some(1));
        assert_eq!(args.timeout_ms, Some(0));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(args.dry_run);
    }
}
