use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use slog::{debug, warn, Logger};

/// Operational settings for the web front end. Every field has a default, so a missing file or
/// section is not an error.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub restic: ResticSettings,
    pub paths: PathSettings,
    pub aws: AwsSettings,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind the HTTP server to
    pub host: String,

    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ResticSettings {
    /// Location of the `restic` binary
    #[serde(default = "default_restic_binary")]
    pub binary: String,

    /// File containing the password shared by every repository
    #[serde(default = "default_password_file")]
    pub password_file: PathBuf,

    /// Value for `restic backup --compression` (`auto`, `off` or `max`)
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Policy applied with `restic forget --prune` before each backup
    #[serde(default = "default_retention")]
    pub retention: RetentionPolicy,
}

impl Default for ResticSettings {
    fn default() -> Self {
        ResticSettings {
            binary: default_restic_binary(),
            password_file: default_password_file(),
            compression: default_compression(),
            retention: default_retention(),
        }
    }
}

fn default_restic_binary() -> String {
    "/usr/local/bin/restic".into()
}

fn default_password_file() -> PathBuf {
    "/root/.backup_pass".into()
}

fn default_compression() -> String {
    "auto".into()
}

fn default_retention() -> RetentionPolicy {
    RetentionPolicy {
        keep_daily: Some(14),
        keep_weekly: Some(2),
        ..RetentionPolicy::default()
    }
}

/// Describes how to keep/forget snapshots.
///
/// See the [Restic documentation](https://restic.readthedocs.io/en/latest/060_forget.html#removing-snapshots-according-to-a-policy).
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Keep the `n` most recent snapshots
    pub keep_last: Option<usize>,

    /// Keep the most recent snapshot for the last `n` hours that have one
    pub keep_hourly: Option<usize>,

    /// Keep the most recent snapshot for the last `n` days that have one
    pub keep_daily: Option<usize>,

    /// Keep the most recent snapshot for the last `n` weeks that have one
    pub keep_weekly: Option<usize>,

    /// Keep the most recent snapshot for the last `n` months that have one
    pub keep_monthly: Option<usize>,

    /// Keep the most recent snapshot for the last `n` years that have one
    pub keep_yearly: Option<usize>,

    /// Keep all snapshots made within some duration of the most recent snapshot, like `1y3m10d2h`.
    pub keep_within: Option<String>,

    /// Keep all snapshots with any of these tag lists. `[["tag1", "tag2"], ["tag3"]]` keeps snapshots
    /// that either have both `tag1` and `tag2` or have `tag3`.
    pub keep_tags: Vec<Vec<String>>,
}

impl RetentionPolicy {
    /// Returns `true` if this policy is empty (i.e. it doesn't specify any snapshots to keep)
    pub fn is_empty(&self) -> bool {
        self.keep_last.is_none()
            && self.keep_hourly.is_none()
            && self.keep_daily.is_none()
            && self.keep_weekly.is_none()
            && self.keep_monthly.is_none()
            && self.keep_yearly.is_none()
            && self.keep_within.is_none()
            && self.keep_tags.is_empty()
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PathSettings {
    /// Directory receiving one transcript file per operation
    pub log_dir: PathBuf,

    /// JSON file holding the backup/restore job history
    pub job_store: PathBuf,

    /// Restores may only target this directory or its descendants
    pub restore_root: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        PathSettings {
            log_dir: "./data/logs".into(),
            job_store: "./data/job_history.json".into(),
            restore_root: "/mnt/restores".into(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AwsSettings {
    /// Location of the `aws` CLI binary
    pub binary: String,

    pub default_region: String,

    /// S3 endpoint host used when a destination or request does not name one
    pub default_endpoint: String,
}

impl Default for AwsSettings {
    fn default() -> Self {
        AwsSettings {
            binary: "/usr/local/bin/aws".into(),
            default_region: "us-east-1".into(),
            default_endpoint: "s3.amazonaws.com".into(),
        }
    }
}

/// Loads settings from `path`. A missing file falls back to the defaults.
pub fn load_settings<P: AsRef<Path>>(logger: &Logger, path: P) -> Result<Settings> {
    let path = path.as_ref();
    debug!(logger, "Loading settings from {}", path.display());

    let settings_str = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!(logger, "Settings file not found, using defaults"; "path" => %path.display());
            return Ok(Settings::default());
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Could not read settings file {}", path.display()))
        }
    };

    let settings = toml::from_str(&settings_str)
        .with_context(|| format!("Could not parse settings file {}", path.display()))?;

    Ok(settings)
}
