use std::io::{self, prelude::*};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use actix_web::web;
use anyhow::{Result, Context};
use chrono::{Local, TimeZone};
use slog::{Logger, Drain, o, error};
use structopt::StructOpt;

mod api;
mod aws;
mod backup;
mod command;
mod config;
mod forget;
mod inventory;
mod jobs;
mod restic;
mod restore;
mod snapshots;

#[cfg(test)]
mod test;

use api::AppState;
use config::Settings;
use inventory::{DestinationKind, InventoryStore};
use jobs::JobStore;

// TODO: HTTP basic auth in front of the API before exposing it beyond localhost

#[derive(Debug, StructOpt)]
struct Args {
    /// Path to the settings file
    #[structopt(short = "c", long = "config", env = "RUSTIC_WEB_CONFIG", default_value = "config/app.toml", parse(from_os_str))]
    config_file: PathBuf,

    /// Path to the inventory of filesystems and destinations
    #[structopt(short = "i", long = "inventory", env = "RUSTIC_WEB_INVENTORY", default_value = "config/backups.toml", parse(from_os_str))]
    inventory_file: PathBuf,

    #[structopt(subcommand)]
    command: Command
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Run the web UI and API
    Serve,

    /// List configured filesystems
    Filesystems,

    /// List configured destinations
    Destinations,

    /// List recent backup and restore jobs
    Jobs {
        /// Maximum number of jobs to show
        #[structopt(short = "n", long = "limit", default_value = "25")]
        limit: usize,
    },
}

fn list_filesystems(settings: &Settings, inventory: &InventoryStore) -> Result<()> {
    let inventory = inventory.load()?;

    let mut tw = tabwriter::TabWriter::new(io::stdout());
    writeln!(tw, "Filesystem\tSource\tDestination\tRepository")?;
    writeln!(tw, "----------\t------\t-----------\t----------")?;
    for fs in inventory.filesystems.iter() {
        let repository = match inventory.destination(&fs.destination_id) {
            Some(dest) => fs.repository(dest, &settings.aws.default_endpoint),
            None => "(missing destination)".to_string(),
        };
        writeln!(tw, "{}\t{}\t{}\t{}", fs.id, fs.source_path, fs.destination_id, repository)?;
    }
    tw.flush()?;

    Ok(())
}

fn list_destinations(inventory: &InventoryStore) -> Result<()> {
    let inventory = inventory.load()?;

    let mut tw = tabwriter::TabWriter::new(io::stdout());
    writeln!(tw, "Destination\tType\tLocation")?;
    writeln!(tw, "-----------\t----\t--------")?;
    for dest in inventory.destinations.iter() {
        let (kind, location) = match &dest.kind {
            DestinationKind::Local { path } => ("local", path.clone()),
            DestinationKind::S3 { bucket, prefix, .. } => match prefix {
                Some(prefix) => ("s3", format!("{}/{}", bucket, prefix.trim_matches('/'))),
                None => ("s3", bucket.clone()),
            },
        };
        writeln!(tw, "{}\t{}\t{}", dest.id, kind, location)?;
    }
    tw.flush()?;

    Ok(())
}

fn list_jobs(settings: &Settings, limit: usize) -> Result<()> {
    let jobs = JobStore::open(settings.paths.job_store.clone())?;

    let mut tw = tabwriter::TabWriter::new(io::stdout());
    writeln!(tw, "Job\tType\tFilesystem\tStatus\tCreated")?;
    writeln!(tw, "---\t----\t----------\t------\t-------")?;
    for job in jobs.recent(limit) {
        let created = Local
            .timestamp_opt(job.created_at, 0)
            .single()
            .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let status = serde_json::to_value(job.status)?;
        let kind = serde_json::to_value(job.kind)?;
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}",
            job.id,
            kind.as_str().unwrap_or_default(),
            job.filesystem_id,
            status.as_str().unwrap_or_default(),
            created
        )?;
    }
    tw.flush()?;

    Ok(())
}

fn serve(settings: Settings, inventory_file: &Path, logger: &Logger) -> Result<()> {
    fs::create_dir_all(&settings.paths.log_dir)
        .with_context(|| format!("Could not create log directory {}", settings.paths.log_dir.display()))?;

    let state = AppState::new(settings, inventory_file, logger.clone())?;
    actix_web::rt::System::new().block_on(api::serve(web::Data::new(state)))
}

fn run(args: Args, logger: &Logger) -> Result<()> {
    let settings = config::load_settings(logger, &args.config_file)?;

    match args.command {
        Command::Serve => {
            serve(settings, &args.inventory_file, logger)?;
        },
        Command::Filesystems => {
            list_filesystems(&settings, &InventoryStore::new(&args.inventory_file))?;
        },
        Command::Destinations => {
            list_destinations(&InventoryStore::new(&args.inventory_file))?;
        },
        Command::Jobs { limit } => {
            list_jobs(&settings, limit)?;
        }
    };

    Ok(())
}

#[paw::main]
fn main(args: Args) {
    human_panic::setup_panic!();

    let decorator = slog_term::TermDecorator::new().build();
    let term_drain = slog_term::FullFormat::new(decorator).use_local_timestamp().build().fuse();
    // Mutex drain rather than slog_async, so nothing needs flushing before std::process::exit
    let drain = Mutex::new(term_drain).fuse();
    let root = Logger::root(drain, o!("rustic_web_version" => env!("CARGO_PKG_VERSION")));

    if let Err(err) = run(args, &root) {
        error!(root, "Fatal error: {:?}", err);
        std::process::exit(1);
    }
}
