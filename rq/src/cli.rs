//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::scheduler::RateOptions;

/// rq - run work no faster than N per T seconds, in order
#[derive(Parser)]
#[command(
    name = "rq",
    about = "Run shell commands one at a time, in order, under a rate limit",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run command lines from a file (or stdin) under the rate limit
    Run {
        /// File with one command per line; `-` or absent reads stdin
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Commands allowed per window
        #[arg(short = 'n', long = "requests", allow_negative_numbers = true)]
        requests: Option<i64>,

        /// Window length in seconds
        #[arg(short = 'p', long = "per-seconds", allow_negative_numbers = true)]
        per_seconds: Option<f64>,

        /// Extra delay added to every wait, in milliseconds
        #[arg(long = "margin-ms")]
        margin_ms: Option<u64>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config,
}

impl Command {
    /// Rate options given on the command line, if this is `run`
    pub fn rate_overrides(&self) -> RateOptions {
        debug!("Command::rate_overrides: called");
        match self {
            Command::Run {
                requests, per_seconds, ..
            } => RateOptions {
                no_requests: *requests,
                per_number_of_seconds: *per_seconds,
            },
            Command::Config => RateOptions::default(),
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ratequeue")
        .join("logs")
        .join("ratequeue.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Output format for command results
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("PLAIN".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_run_rate_overrides() {
        let cli = Cli::parse_from(["rq", "run", "jobs.txt", "-n", "3", "-p", "1.5", "--format", "json"]);
        assert_eq!(cli.command.rate_overrides(), RateOptions::new(3, 1.5));
        match cli.command {
            Command::Run { file, format, margin_ms, .. } => {
                assert_eq!(file, Some(PathBuf::from("jobs.txt")));
                assert_eq!(format, OutputFormat::Json);
                assert_eq!(margin_ms, None);
            }
            Command::Config => panic!("expected run"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["rq", "config", "-l", "debug", "-c", "rq.yml"]);
        assert!(matches!(cli.command, Command::Config));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("rq.yml")));
        assert_eq!(cli.command.rate_overrides(), RateOptions::default());
    }

    #[test]
    fn test_log_path_location() {
        assert!(get_log_path().ends_with("ratequeue/logs/ratequeue.log"));
    }
}
