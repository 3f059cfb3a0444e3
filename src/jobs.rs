//! History of backup and restore runs, persisted as JSON

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::inventory::write_atomically;

/// Number of jobs kept in the history file; older ones are dropped when it is written.
const MAX_JOBS: usize = 500;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Backup,
    Restore,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

/// A single backup or restore run. Timestamps are Unix seconds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub filesystem_id: String,
    pub status: JobStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub log_path: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Default)]
struct JobFile {
    #[serde(default)]
    jobs: HashMap<String, Job>,
}

/// Job history shared by all requests. Every change is written through to disk.
pub struct JobStore {
    path: PathBuf,
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobStore {
    /// Opens the history at `path`, starting empty if the file does not exist. Jobs that were still running when the
    /// previous process exited are marked failed.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<JobStore> {
        let path = path.into();
        let mut jobs = match fs::read_to_string(&path) {
            Ok(contents) => {
                serde_json::from_str::<JobFile>(&contents)
                    .with_context(|| format!("Could not parse job history {}", path.display()))?
                    .jobs
            }
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Could not read job history {}", path.display()))
            }
        };

        let now = Utc::now().timestamp();
        let mut interrupted = 0;
        for job in jobs.values_mut().filter(|job| job.status == JobStatus::Running) {
            job.status = JobStatus::Failed;
            job.finished_at = Some(now);
            job.error = Some("interrupted by server restart".into());
            interrupted += 1;
        }

        let store = JobStore {
            path,
            jobs: Mutex::new(jobs),
        };
        if interrupted > 0 {
            store.save(&mut store.lock())?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of every recorded job, keyed by ID.
    pub fn list(&self) -> HashMap<String, Job> {
        self.lock().clone()
    }

    /// The most recent jobs first, at most `limit` of them.
    pub fn recent(&self, limit: usize) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        jobs
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.lock().get(id).cloned()
    }

    /// Records a job that is starting now and returns its ID.
    pub fn start(&self, kind: JobKind, filesystem_id: &str, log_path: &Path) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string()[..12].to_string();
        let now = Utc::now().timestamp();
        let job = Job {
            id: id.clone(),
            kind,
            filesystem_id: filesystem_id.to_string(),
            status: JobStatus::Running,
            created_at: now,
            started_at: Some(now),
            finished_at: None,
            log_path: log_path.display().to_string(),
            result: None,
            error: None,
        };

        let mut jobs = self.lock();
        jobs.insert(id.clone(), job);
        self.save(&mut jobs)?;
        Ok(id)
    }

    /// Marks a job finished, storing either its result or the error text.
    pub fn finish<T: Serialize>(&self, id: &str, outcome: &Result<T>) -> Result<()> {
        let mut jobs = self.lock();
        if let Some(job) = jobs.get_mut(id) {
            job.finished_at = Some(Utc::now().timestamp());
            match outcome {
                Ok(result) => {
                    job.status = JobStatus::Completed;
                    job.result = Some(serde_json::to_value(result).context("Could not serialize job result")?);
                }
                Err(err) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(format!("{:#}", err));
                }
            }
        }
        self.save(&mut jobs)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, jobs: &mut HashMap<String, Job>) -> Result<()> {
        prune(jobs, MAX_JOBS);

        #[derive(Serialize)]
        struct JobFileRef<'a> {
            jobs: &'a HashMap<String, Job>,
        }

        let contents = serde_json::to_vec_pretty(&JobFileRef { jobs }).context("Could not serialize job history")?;
        write_atomically(&self.path, &contents)
            .with_context(|| format!("Could not write job history {}", self.path.display()))
    }
}

/// Drops all but the `limit` most recently created jobs. Running jobs are always kept.
fn prune(jobs: &mut HashMap<String, Job>, limit: usize) {
    if jobs.len() <= limit {
        return;
    }

    let mut created: Vec<(i64, String)> = jobs
        .values()
        .map(|job| (job.created_at, job.id.clone()))
        .collect();
    created.sort_by(|a, b| b.cmp(a));
    for (_, id) in created.into_iter().skip(limit) {
        if jobs.get(&id).map_or(false, |job| job.status != JobStatus::Running) {
            jobs.remove(&id);
        }
    }
}
