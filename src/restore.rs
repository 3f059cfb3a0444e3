//! Restoring snapshots into the restore area

use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use slog::{error, info};
use thiserror::Error;

use crate::restic::Restic;

#[derive(Debug, Error)]
pub enum RestoreTargetError {
    #[error("Restore target {} must be inside restore root {}", .target.display(), .root.display())]
    OutsideRoot { target: PathBuf, root: PathBuf },

    #[error("Could not resolve restore target: {0}")]
    Io(#[from] io::Error),
}

/// Resolves `target` to an absolute path and checks that it is `root` or one of its descendants. Relative paths are
/// taken against the working directory, `..` components are collapsed and the parts of the path that already exist
/// are canonicalized so symlinks cannot escape the root.
pub fn resolve_restore_target(root: &Path, target: &Path) -> Result<PathBuf, RestoreTargetError> {
    let root = resolve(root)?;
    let target = resolve(target)?;

    if target.starts_with(&root) {
        Ok(target)
    } else {
        Err(RestoreTargetError::OutsideRoot { target, root })
    }
}

fn resolve(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    Ok(canonicalize_existing(&normalized))
}

/// Canonicalizes the longest prefix of `path` that exists and appends the remaining components unchanged.
fn canonicalize_existing(path: &Path) -> PathBuf {
    let mut missing: Vec<OsString> = Vec::new();
    let mut existing = path;
    loop {
        if let Ok(mut canonical) = existing.canonicalize() {
            for name in missing.iter().rev() {
                canonical.push(name);
            }
            return canonical;
        }

        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Summary of a finished restore, reported to the client and stored in the job history
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub repo: String,
    pub snapshot: String,
    pub target: String,
}

/// Extends the Restic wrapper with restore commands
impl<'a> Restic<'a> {
    /// Restores `snapshot_id` into `target`, which must already have been checked against the restore root.
    pub async fn restore(&self, snapshot_id: &str, target: &Path) -> Result<RestoreSummary> {
        self.unlock().await?;

        let mut cmd = self.new_command();
        cmd.arg("restore").arg(snapshot_id).arg("--target").arg(target);

        info!(self.logger(), "Restoring snapshot"; "snapshot" => snapshot_id, "target" => %target.display());
        let start = Instant::now();
        let output = self.run(&mut cmd).await?;
        let duration = Instant::now() - start;

        if !output.success() {
            error!(self.logger(), "Restore failed"; "status" => %output.status, "snapshot" => snapshot_id);
            return Err(output.failure("restic restore"));
        }

        info!(self.logger(), "Restored snapshot in {:?}", duration; "snapshot" => snapshot_id);
        Ok(RestoreSummary {
            repo: self.repository().to_string(),
            snapshot: snapshot_id.to_string(),
            target: target.display().to_string(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::TestFixture;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_target_inside_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("restores");
        fs::create_dir(&root).unwrap();

        let target = resolve_restore_target(&root, &root.join("photos/2024")).unwrap();
        assert_eq!(target, root.canonicalize().unwrap().join("photos/2024"));

        assert!(resolve_restore_target(&root, &root).is_ok(), "The root itself is a valid target");
    }

    #[test]
    fn test_target_outside_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("restores");
        fs::create_dir(&root).unwrap();

        for target in &[
            dir.path().to_path_buf(),
            dir.path().join("restores-other"),
            root.join("../etc"),
            root.join("photos/../../elsewhere"),
            PathBuf::from("/etc"),
        ] {
            match resolve_restore_target(&root, target) {
                Err(RestoreTargetError::OutsideRoot { .. }) => {}
                other => panic!("{} should be rejected, got {:?}", target.display(), other),
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("restores");
        let outside = dir.path().join("outside");
        fs::create_dir(&root).unwrap();
        fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        assert!(matches!(
            resolve_restore_target(&root, &root.join("link/photos")),
            Err(RestoreTargetError::OutsideRoot { .. })
        ));
    }

    #[actix_web::test]
    async fn test_restore_command() {
        let fixture = TestFixture::new();
        let restic = fixture.restic("photos");
        let target = fixture.restore_root().join("photos");

        let summary = restic.restore("4f9ab1c2", &target).await.unwrap();
        assert_eq!(summary.snapshot, "4f9ab1c2");
        assert_eq!(summary.target, target.display().to_string());

        assert_eq!(fixture.restic_subcommands(), vec!["unlock", "restore"]);
        let calls = fixture.restic_calls();
        assert!(calls[1].ends_with(&format!("restore 4f9ab1c2 --target {}", target.display())));
    }
}
