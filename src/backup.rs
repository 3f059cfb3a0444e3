//! Implementation for Restic backups.

use std::time::Instant;

use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use slog::{debug, error, info, warn};

use crate::restic::Restic;

/// Summary of a finished backup, reported to the client and stored in the job history
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BackupSummary {
    pub repo: String,
    pub tag: String,
}

/// Tag identifying snapshots made through the web UI, like `backup-20240131-235900`.
pub fn backup_tag() -> String {
    format!("backup-{}", Local::now().format("%Y%m%d-%H%M%S"))
}

// This uses an impl block in a separate file so it has access to all the repo info but keeps backup-specific Restic details
// nicely contained

/// Extends the Restic wrapper with backup commands.
impl<'a> Restic<'a> {
    /// Attempts to initialize the Restic repository. Note that this *does not* check if the repository has already been initialized.
    pub async fn init(&self) -> Result<()> {
        let mut cmd = self.new_command();
        cmd.arg("init");
        debug!(self.logger(), "Initializing Restic repository");

        let output = self.run(&mut cmd).await?;
        if output.success() {
            debug!(self.logger(), "Restic repository initialized");
            Ok(())
        } else {
            Err(output.failure("restic init"))
        }
    }

    /// Runs a backup of `source_path`. The repository is initialized first if it does not exist yet, and old snapshots
    /// are forgotten according to the retention policy before the new one is taken.
    pub async fn backup(&self, source_path: &str) -> Result<BackupSummary> {
        if !self.repository_exists().await? {
            info!(self.logger(), "Repository not found, initializing");
            self.init().await?;
        }

        self.unlock().await?;

        if let Err(err) = self.forget(true).await {
            warn!(self.logger(), "Applying retention policy failed, continuing with backup"; "error" => %err);
        }

        let tag = backup_tag();
        let mut cmd = self.new_command();
        cmd.arg("backup")
            .arg(source_path)
            .arg("--tag")
            .arg(&tag)
            .arg("--compression")
            .arg(&self.settings().compression)
            .arg("--verbose")
            .arg("--skip-if-unchanged");

        info!(self.logger(), "Beginning backup"; "source" => source_path, "tag" => &tag);
        let start = Instant::now();
        let output = self.run(&mut cmd).await?;
        let duration = Instant::now() - start;

        if !output.success() {
            error!(self.logger(), "Backup failed"; "status" => %output.status, "source" => source_path);
            return Err(output.failure("restic backup"));
        }

        info!(self.logger(), "Backup finished successfully in {:?}", duration; "source" => source_path);
        Ok(BackupSummary {
            repo: self.repository().to_string(),
            tag,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::TestFixture;

    #[test]
    fn test_backup_tag_format() {
        let tag = backup_tag();
        assert!(tag.starts_with("backup-"));
        assert_eq!(tag.len(), "backup-20240131-235900".len());
    }

    #[actix_web::test]
    async fn test_backup_initializes_repository() {
        let fixture = TestFixture::new();
        let restic = fixture.restic("photos");

        let summary = restic.backup(&fixture.content_root().display().to_string()).await.unwrap();
        assert_eq!(summary.repo, restic.repository());
        assert!(summary.tag.starts_with("backup-"));

        let subcommands: Vec<String> = fixture.restic_subcommands();
        assert_eq!(subcommands, vec!["snapshots", "init", "unlock", "forget", "backup"]);

        let calls = fixture.restic_calls();
        assert!(calls[3].ends_with("forget --keep-daily 14 --keep-weekly 2 --prune"), "{}", calls[3]);
        assert!(calls[4].contains("--compression auto --verbose --skip-if-unchanged"), "{}", calls[4]);
    }

    #[actix_web::test]
    async fn test_existing_repository_not_reinitialized() {
        let fixture = TestFixture::new();
        let restic = fixture.restic("photos");
        restic.init().await.unwrap();
        fixture.clear_restic_calls();

        restic.backup("/srv/photos").await.unwrap();
        assert_eq!(fixture.restic_subcommands(), vec!["snapshots", "unlock", "forget", "backup"]);
    }

    #[actix_web::test]
    async fn test_forget_failure_does_not_stop_backup() {
        let fixture = TestFixture::new();
        fixture.fail_restic("forget", "Fatal: unable to create lock");
        let restic = fixture.restic("photos");
        assert!(restic.backup("/srv/photos").await.is_ok());
    }

    #[actix_web::test]
    async fn test_failed_backup_reports_stderr() {
        let fixture = TestFixture::new();
        fixture.fail_restic("backup", "Fatal: unable to save snapshot: disk full");
        let restic = fixture.restic("photos");

        let err = restic.backup("/srv/photos").await.unwrap_err();
        assert!(err.to_string().contains("disk full"), "{}", err);

        let log = std::fs::read_to_string(restic.log_path()).unwrap();
        assert!(log.contains("disk full"));
    }

    #[actix_web::test]
    async fn test_failed_init_fails_backup() {
        let fixture = TestFixture::new();
        fixture.fail_restic("init", "Fatal: create repository failed: permission denied");
        let restic = fixture.restic("photos");

        let err = restic.backup("/srv/photos").await.unwrap_err();
        assert!(err.to_string().starts_with("restic init failed"), "{}", err);
        assert!(!fixture.restic_subcommands().contains(&"backup".to_string()));
    }
}
