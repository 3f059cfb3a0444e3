//! Application state for the API server

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;
use slog::Logger;

use crate::config::Settings;
use crate::inventory::InventoryStore;
use crate::jobs::JobStore;

/// Shared application state
pub struct AppState {
    pub settings: Settings,
    pub inventory: InventoryStore,
    pub jobs: JobStore,
    pub logger: Logger,
}

impl AppState {
    pub fn new(settings: Settings, inventory_path: &Path, logger: Logger) -> Result<Self> {
        let jobs = JobStore::open(settings.paths.job_store.clone())?;
        Ok(Self {
            inventory: InventoryStore::new(inventory_path),
            jobs,
            settings,
            logger,
        })
    }

    /// Log file for one run of `action` on `subject`, like `logs/photos-backup-20240131-235900.log`. Inventory IDs can
    /// be edited by hand, so `subject` is reduced to characters that cannot leave the log directory.
    pub fn operation_log(&self, subject: &str, action: &str) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        self.settings
            .paths
            .log_dir
            .join(format!("{}-{}-{}.log", file_name_safe(subject), action, stamp))
    }
}

fn file_name_safe(subject: &str) -> String {
    let safe: String = subject
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    safe.trim_start_matches('.').to_string()
}

#[cfg(test)]
mod test {
    use crate::test::TestFixture;

    #[test]
    fn test_operation_log_stays_in_log_dir() {
        let fixture = TestFixture::new();
        let state = fixture.state();
        let log_dir = &fixture.settings().paths.log_dir;

        let log = state.operation_log("photos", "backup");
        assert_eq!(log.parent(), Some(log_dir.as_path()));
        let name = log.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("photos-backup-") && name.ends_with(".log"), "{}", name);

        for subject in &["../../etc/cron.d/x", "/tmp/evil", "..", "a/../b"] {
            let log = state.operation_log(subject, "backup");
            assert_eq!(log.parent(), Some(log_dir.as_path()), "{} escaped: {}", subject, log.display());
            assert!(!log.file_name().unwrap().to_string_lossy().starts_with('.'));
        }
    }
}
