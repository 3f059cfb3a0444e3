use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use actix_web::web;
use slog::{o, Drain, Logger};
use slog_term::{FullFormat, TermDecorator};
use tempfile::TempDir;

use crate::api::AppState;
use crate::config::*;
use crate::inventory::*;
use crate::restic::Restic;

/// What the fake `restic` prints for `restic snapshots --json`
pub const SNAPSHOTS_JSON: &str = r#"[{"time":"2024-01-31T23:59:00.123456789+01:00","tree":"a1b2c3d4","paths":["/srv/photos"],"hostname":"nas","username":"root","tags":["backup-20240131-235900"],"id":"4f9ab1c2d3e4f5a6b7c8d9e0f1a2b3c4d5e6f7a8b9c0d1e2f3a4b5c6d7e8f9a0","short_id":"4f9ab1c2"}]
"#;

/// Set when `install_script` checks that a fake binary can run; the scripts exit at once without recording a call.
const INSTALL_CHECK_VAR: &str = "RUSTIC_WEB_FAKE_CHECK";

const ETXTBSY: i32 = 26;

/// Stand-in for the `restic` binary. It records each invocation, keeps just enough state to know whether a local
/// repository was initialized, and fails a subcommand when a `fail-<subcommand>` file exists next to it.
const FAKE_RESTIC: &str = r#"#!/bin/sh
[ -n "$RUSTIC_WEB_FAKE_CHECK" ] && exit 0
dir="$(dirname "$0")"
echo "$*" >> "$dir/restic-calls.log"
repo=""
sub=""
while [ $# -gt 0 ]; do
  case "$1" in
    --repo) repo="$2"; shift 2 ;;
    --password-file|-o) shift 2 ;;
    *) sub="$1"; shift; break ;;
  esac
done
if [ -f "$dir/fail-$sub" ]; then
  cat "$dir/fail-$sub" >&2
  exit 1
fi
case "$sub" in
  init)
    mkdir -p "$repo" && touch "$repo/config"
    echo "created restic repository at $repo" ;;
  snapshots)
    if [ ! -f "$repo/config" ]; then
      echo "Fatal: unable to open config file: Is there a repository at the following location?" >&2
      exit 10
    fi
    cat "$dir/snapshots.json" ;;
  unlock) ;;
  forget) echo "Applying Policy: keep daily and weekly snapshots" ;;
  backup) echo "processed $1" ;;
  restore) echo "restoring snapshot $1" ;;
  version) echo "restic 0.16.4 compiled with go1.21.6 on linux/amd64" ;;
  *) echo "unknown command $sub" >&2; exit 1 ;;
esac
"#;

/// Stand-in for the `aws` binary
const FAKE_AWS: &str = r#"#!/bin/sh
[ -n "$RUSTIC_WEB_FAKE_CHECK" ] && exit 0
dir="$(dirname "$0")"
echo "$*" >> "$dir/aws-calls.log"
if [ -f "$dir/fail-aws" ]; then
  cat "$dir/fail-aws" >&2
  exit 254
fi
echo '{"Location": "/bucket"}'
"#;

/// Helper for testing against fake Restic and AWS binaries
pub struct TestFixture {
    root: TempDir,
    content_root: PathBuf,
    bin_dir: PathBuf,
    inventory_path: PathBuf,
    settings: Settings,
    logger: Logger,
}

impl TestFixture {
    pub fn new() -> TestFixture {
        let root = TempDir::new().expect("Could not create temporary directory");
        let content_root = root.path().join("content");
        let repositories = root.path().join("repositories");
        let restore_root = root.path().join("restores");
        let bin_dir = root.path().join("bin");
        for dir in &[&content_root, &repositories, &restore_root, &bin_dir] {
            fs::create_dir(dir).expect("Could not create fixture directory");
        }

        let password_file = root.path().join("password");
        fs::write(&password_file, "test-password\n").expect("Could not write password file");
        fs::write(bin_dir.join("snapshots.json"), SNAPSHOTS_JSON).expect("Could not write snapshots");
        install_script(&bin_dir.join("restic"), FAKE_RESTIC);
        install_script(&bin_dir.join("aws"), FAKE_AWS);

        let settings = Settings {
            server: ServerSettings::default(),
            restic: ResticSettings {
                binary: bin_dir.join("restic").display().to_string(),
                password_file,
                ..ResticSettings::default()
            },
            paths: PathSettings {
                log_dir: root.path().join("logs"),
                job_store: root.path().join("data").join("job_history.json"),
                restore_root,
            },
            aws: AwsSettings {
                binary: bin_dir.join("aws").display().to_string(),
                ..AwsSettings::default()
            },
        };

        let inventory_path = root.path().join("backups.toml");
        let inventory = InventoryStore::new(&inventory_path);
        inventory
            .add_destination(Destination {
                id: "nas".into(),
                name: "NAS".into(),
                kind: DestinationKind::Local {
                    path: repositories.display().to_string(),
                },
            })
            .expect("Could not add destination");
        inventory
            .add_destination(Destination {
                id: "offsite".into(),
                name: "Offsite".into(),
                kind: DestinationKind::S3 {
                    bucket: "archive".into(),
                    prefix: Some("hosts".into()),
                    endpoint: None,
                    region: Some("eu-central-1".into()),
                },
            })
            .expect("Could not add destination");
        inventory
            .add_filesystem(Filesystem {
                id: "photos".into(),
                name: "Photos".into(),
                source_path: content_root.display().to_string(),
                destination_id: "nas".into(),
                repo_suffix: Some("photos".into()),
                repo: None,
            })
            .expect("Could not add filesystem");
        inventory
            .add_filesystem(Filesystem {
                id: "offsite-docs".into(),
                name: "Documents".into(),
                source_path: "/srv/docs".into(),
                destination_id: "offsite".into(),
                repo_suffix: Some("docs".into()),
                repo: None,
            })
            .expect("Could not add filesystem");

        let decorator = TermDecorator::new().build();
        let drain = FullFormat::new(decorator).build();
        let drain = Mutex::new(drain).fuse();
        let logger = Logger::root(drain, o!("test_root" => root.path().display().to_string()));

        TestFixture {
            root,
            content_root,
            bin_dir,
            inventory_path,
            settings,
            logger,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Directory containing content files for backing up
    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    pub fn restore_root(&self) -> &Path {
        &self.settings.paths.restore_root
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn inventory(&self) -> InventoryStore {
        InventoryStore::new(&self.inventory_path)
    }

    pub fn restic(&self, fs_id: &str) -> Restic {
        let (filesystem, destination) = self.inventory().lookup(fs_id).unwrap();
        let log_path = self.settings.paths.log_dir.join(format!("{}-test.log", fs_id));
        Restic::for_filesystem(&self.settings, &self.logger, &filesystem, &destination, log_path)
    }

    /// Application state for API tests, sharing this fixture's files
    pub fn state(&self) -> web::Data<AppState> {
        let state = AppState::new(self.settings.clone(), &self.inventory_path, self.logger.clone())
            .expect("Could not create application state");
        web::Data::new(state)
    }

    /// Makes the fake `restic` fail `subcommand`, printing `message` to stderr.
    pub fn fail_restic(&self, subcommand: &str, message: &str) {
        fs::write(self.bin_dir.join(format!("fail-{}", subcommand)), message).unwrap();
    }

    pub fn fail_aws(&self, message: &str) {
        fs::write(self.bin_dir.join("fail-aws"), message).unwrap();
    }

    /// Arguments of every `restic` invocation so far, one line per call
    pub fn restic_calls(&self) -> Vec<String> {
        read_lines(&self.bin_dir.join("restic-calls.log"))
    }

    /// The subcommand of every `restic` invocation so far
    pub fn restic_subcommands(&self) -> Vec<String> {
        self.restic_calls()
            .iter()
            .filter_map(|call| {
                let mut args = call.split_whitespace();
                while let Some(arg) = args.next() {
                    match arg {
                        "--repo" | "--password-file" | "-o" => {
                            args.next();
                        }
                        sub => return Some(sub.to_string()),
                    }
                }
                None
            })
            .collect()
    }

    pub fn clear_restic_calls(&self) {
        let _ = fs::remove_file(self.bin_dir.join("restic-calls.log"));
    }

    pub fn aws_calls(&self) -> Vec<String> {
        read_lines(&self.bin_dir.join("aws-calls.log"))
    }
}

/// Installs a fake binary under a staging name, renames it into place, then waits until it can be executed. Tests run
/// in parallel, and a process forked by another test while the script was open for writing keeps that descriptor
/// until it execs, making our exec fail with ETXTBSY in the meantime.
fn install_script(path: &Path, contents: &str) {
    let staging = path.with_extension("tmp");
    fs::write(&staging, contents).expect("Could not write fake binary");
    fs::set_permissions(&staging, fs::Permissions::from_mode(0o755)).expect("Could not make fake binary executable");
    fs::rename(&staging, path).expect("Could not install fake binary");

    for _ in 0..100 {
        match std::process::Command::new(path).env(INSTALL_CHECK_VAR, "1").status() {
            Err(err) if err.raw_os_error() == Some(ETXTBSY) => thread::sleep(Duration::from_millis(10)),
            Err(err) => panic!("Could not run fake binary {}: {}", path.display(), err),
            Ok(_) => return,
        }
    }
    panic!("Fake binary {} stayed busy", path.display());
}

fn read_lines(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(contents) => contents.lines().map(String::from).collect(),
        Err(_) => Vec::new(),
    }
}
