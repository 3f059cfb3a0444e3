//! Shared functions for interacting with Restic (mostly generating command lines)
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Result;
use slog::{debug, o, warn, Logger};
use tokio::process::Command;

use crate::command::{run_logged, CommandOutput};
use crate::config::{ResticSettings, Settings};
use crate::inventory::{Destination, Filesystem};

/// Wrapper around the Restic CLI, bound to one filesystem's repository and operation log
pub struct Restic<'a> {
    logger: Logger,
    settings: &'a ResticSettings,
    repository: String,
    log_path: PathBuf,
    shared_args: Vec<OsString>,
}

impl<'a> Restic<'a> {
    /// Creates a Restic wrapper for the repository holding `filesystem` at `destination`. Every command run through it
    /// appends to `log_path`.
    pub fn for_filesystem(
        settings: &'a Settings,
        logger: &Logger,
        filesystem: &Filesystem,
        destination: &Destination,
        log_path: PathBuf,
    ) -> Restic<'a> {
        let repository = filesystem.repository(destination, &settings.aws.default_endpoint);
        let logger = logger.new(o!("filesystem" => filesystem.id.clone(), "repository" => repository.clone()));

        let mut shared_args: Vec<OsString> = vec![
            "--repo".into(),
            repository.clone().into(),
            "--password-file".into(),
            settings.restic.password_file.clone().into(),
        ];
        if let Some(region) = destination.kind.region() {
            shared_args.push("-o".into());
            shared_args.push(format!("s3.region={}", region).into());
        }

        Restic {
            logger,
            settings: &settings.restic,
            repository,
            log_path,
            shared_args,
        }
    }

    /// Starts building a Restic command line. The returned command has the repository and
    /// credentials set, but no operation-specific flags.
    pub fn new_command(&self) -> Command {
        let mut cmd = Command::new(&self.settings.binary);
        cmd.args(&self.shared_args);
        cmd
    }

    /// Runs a command built by [`Restic::new_command`], recording it in the operation log.
    pub async fn run(&self, cmd: &mut Command) -> Result<CommandOutput> {
        run_logged(cmd, &self.log_path, &self.logger).await
    }

    pub fn settings(&self) -> &ResticSettings {
        self.settings
    }

    /// Restic repository URL
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Returns a logger scoped to this Restic repository
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Checks if the repository already exists. This uses the method suggested [in the Restic docs](https://restic.readthedocs.io/en/latest/075_scripting.html),
    /// running `restic snapshots`.
    pub async fn repository_exists(&self) -> Result<bool> {
        let mut cmd = self.new_command();
        cmd.arg("snapshots").arg("--json");
        let output = self.run(&mut cmd).await?;
        if output.success() {
            debug!(&self.logger, "`restic snapshots` succeeded, repository exists");
            Ok(true)
        } else {
            debug!(&self.logger, "`restic snapshots` failed, assuming repository does not exist"; "status" => %output.status);
            Ok(false)
        }
    }

    /// Removes stale locks left behind by interrupted runs. Failure is logged, not returned, since the following
    /// command will report a locked repository anyway.
    pub async fn unlock(&self) -> Result<()> {
        let mut cmd = self.new_command();
        cmd.arg("unlock");
        let output = self.run(&mut cmd).await?;
        if !output.success() {
            let err = output.failure("restic unlock");
            warn!(self.logger, "Unlocking repository failed"; "error" => %err);
        }
        Ok(())
    }
}
