//! Shell command work items for `rq run`

use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

/// A command line that ran and exited successfully
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
    /// When the scheduler started this command
    pub started_at: Instant,
}

impl CommandOutput {
    /// First non-empty line of stdout, if any
    pub fn summary(&self) -> Option<&str> {
        self.stdout.lines().map(str::trim).find(|line| !line.is_empty())
    }
}

/// Errors from running a command line
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}", exit_code_text(.code))]
    Exited {
        command: String,
        code: Option<i32>,
        stderr: String,
        started_at: Instant,
    },
}

fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl CommandError {
    pub fn command(&self) -> &str {
        match self {
            CommandError::Spawn { command, .. } | CommandError::Exited { command, .. } => command,
        }
    }
}

/// Split a command file into runnable lines
///
/// Blank lines and lines starting with `#` are skipped.
pub fn parse_command_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Run `line` through `shell -c`, capturing its output
///
/// `started_at` is recorded by the caller when the scheduler admits the
/// command, and carried through to the result.
pub async fn run_command(shell: &str, line: &str, started_at: Instant) -> Result<CommandOutput, CommandError> {
    debug!(%shell, %line, "run_command: called");
    let output = Command::new(shell)
        .arg("-c")
        .arg(line)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| CommandError::Spawn {
            command: line.to_string(),
            source,
        })?;

    if output.status.success() {
        debug!(%line, "run_command: succeeded");
        Ok(CommandOutput {
            command: line.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            started_at,
        })
    } else {
        debug!(%line, status = ?output.status, "run_command: failed");
        Err(CommandError::Exited {
            command: line.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            started_at,
        })
    }
}
