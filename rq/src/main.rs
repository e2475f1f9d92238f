//! rq - rate-limited command runner
//!
//! CLI entry point for running command lines through the rate-limited scheduler.

use std::fs;
use std::io::Read;
use std::path::Path;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

use ratequeue::cli::{Cli, Command, OutputFormat, get_log_path};
use ratequeue::config::Config;
use ratequeue::runner::{CommandError, CommandOutput, parse_command_list, run_command};
use ratequeue::scheduler::{Outcome, RateOptions, RateScheduler, TaskError};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    let overrides = cli.command.rate_overrides();
    match cli.command {
        Command::Run {
            file,
            margin_ms,
            format,
            ..
        } => {
            debug!(?file, ?margin_ms, ?format, "main: matched Run command");
            cmd_run(&config, file.as_deref(), &overrides, margin_ms, format).await
        }
        Command::Config => {
            debug!("main: matched Config command");
            cmd_config(&config)
        }
    }
}

/// Read the command list from a file, or stdin for `-`/absent
fn read_commands(file: Option<&Path>) -> Result<Vec<String>> {
    debug!(?file, "read_commands: called");
    let content = match file {
        Some(path) if path != Path::new("-") => {
            fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?
        }
        _ => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("Failed to read commands from stdin")?;
            content
        }
    };
    Ok(parse_command_list(&content))
}

/// Run every command line through the scheduler and report outcomes as they settle
async fn cmd_run(
    config: &Config,
    file: Option<&Path>,
    overrides: &RateOptions,
    margin_ms: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    debug!(?file, ?overrides, ?margin_ms, "cmd_run: called");
    let commands = read_commands(file)?;
    if commands.is_empty() {
        println!("No commands to run");
        return Ok(());
    }

    let mut scheduler_config = config.scheduler_config(overrides);
    if let Some(ms) = margin_ms {
        scheduler_config = scheduler_config.with_safety_margin(Duration::from_millis(ms));
    }
    info!(
        commands = commands.len(),
        max_executions = scheduler_config.max_executions,
        window = ?scheduler_config.window,
        "cmd_run: starting"
    );

    let handle = RateScheduler::<CommandOutput, CommandError>::new(scheduler_config).spawn();
    let run_start = Instant::now();
    let total = commands.len();

    let mut pending: FuturesUnordered<_> = commands
        .into_iter()
        .map(|line| {
            let shell = config.runner.shell.clone();
            handle.submit(move || {
                let started_at = Instant::now();
                async move { run_command(&shell, &line, started_at).await }
            })
        })
        .enumerate()
        .map(|(index, submission)| async move { (index, submission.await) })
        .collect();

    let mut failed = 0usize;
    while let Some((index, outcome)) = pending.next().await {
        if outcome.is_err() {
            failed += 1;
        }
        match format {
            OutputFormat::Text => println!("{}", format_text(index, &outcome, run_start)),
            OutputFormat::Json => println!("{}", format_json(index, &outcome, run_start)),
        }
    }

    let stats = handle.stats().await?;
    info!(?stats, "cmd_run: finished");

    if failed > 0 {
        return Err(eyre!("{} of {} commands failed", failed, total));
    }
    Ok(())
}

fn offset_ms(started_at: Option<Instant>, run_start: Instant) -> Option<u64> {
    started_at.map(|at| at.saturating_duration_since(run_start).as_millis() as u64)
}

fn outcome_start(outcome: &Outcome<CommandOutput, CommandError>) -> Option<Instant> {
    match outcome {
        Ok(output) => Some(output.started_at),
        Err(TaskError::Failed(CommandError::Exited { started_at, .. })) => Some(*started_at),
        Err(_) => None,
    }
}

fn format_text(index: usize, outcome: &Outcome<CommandOutput, CommandError>, run_start: Instant) -> String {
    let offset = match offset_ms(outcome_start(outcome), run_start) {
        Some(ms) => format!("[+{:>6}ms]", ms),
        None => "[        -]".to_string(),
    };

    match outcome {
        Ok(output) => format!(
            "{} #{} {} {}{}",
            offset.dimmed(),
            index,
            "ok".green(),
            output.command,
            output.summary().map(|s| format!("  {}", s.dimmed())).unwrap_or_default()
        ),
        Err(TaskError::Failed(error)) => format!("{} #{} {} {}", offset.dimmed(), index, "failed".red(), error),
        Err(error) => format!("{} #{} {} {}", offset.dimmed(), index, "error".red().bold(), error),
    }
}

fn format_json(index: usize, outcome: &Outcome<CommandOutput, CommandError>, run_start: Instant) -> String {
    let started_ms = offset_ms(outcome_start(outcome), run_start);
    let value = match outcome {
        Ok(output) => serde_json::json!({
            "index": index,
            "status": "ok",
            "command": output.command,
            "started_ms": started_ms,
            "stdout": output.stdout,
        }),
        Err(TaskError::Failed(error)) => serde_json::json!({
            "index": index,
            "status": "failed",
            "command": error.command(),
            "started_ms": started_ms,
            "error": error.to_string(),
        }),
        Err(error) => serde_json::json!({
            "index": index,
            "status": "error",
            "error": error.to_string(),
        }),
    };
    value.to_string()
}

/// Print the effective configuration as YAML
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}
