//! Runs external commands, appending a transcript of each run to an operation log file

use std::fs::{self, OpenOptions};
use std::io::prelude::*;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use anyhow::{anyhow, Context, Error, Result};
use itertools::join;
use slog::{debug, Logger};
use tokio::process::Command;

/// Captured result of a finished command
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Builds an error for a failed command, carrying its stderr so callers can show it to the user.
    pub fn failure(&self, what: &str) -> Error {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            anyhow!("{} failed with {}", what, self.status)
        } else {
            anyhow!("{} failed with {}: {}", what, self.status, stderr)
        }
    }
}

/// Renders a command line for logs, like `restic --repo /mnt/nas/photos snapshots --json`.
pub fn command_line(cmd: &Command) -> String {
    let cmd = cmd.as_std();
    let program = cmd.get_program().to_string_lossy().into_owned();
    let args = cmd.get_args().map(|arg| arg.to_string_lossy().into_owned());
    join(std::iter::once(program).chain(args), " ")
}

/// Runs `cmd` to completion, capturing its output. The command line, stdout and stderr are appended
/// to `log_path`. Exiting non-zero is *not* an error here; only failing to start the command is.
pub async fn run_logged(cmd: &mut Command, log_path: &Path, logger: &Logger) -> Result<CommandOutput> {
    let line = command_line(cmd);

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create log directory {}", parent.display()))?;
    }
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Could not open log file {}", log_path.display()))?;
    writeln!(log, "$ {}", line).context("Could not write log file")?;

    debug!(logger, "Running command"; "command" => &line, "log" => %log_path.display());
    let start = Instant::now();
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("Could not run {}", line))?;
    let duration = Instant::now() - start;

    log.write_all(&output.stdout).context("Could not write log file")?;
    log.write_all(&output.stderr).context("Could not write log file")?;

    debug!(logger, "Command finished in {:?}", duration; "status" => %output.status, "command" => &line);

    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
