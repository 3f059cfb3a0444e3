//! The inventory of backup sources and destinations, persisted as a TOML file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub id: String,

    /// Display name
    pub name: String,

    #[serde(flatten)]
    pub kind: DestinationKind,
}

/// Where a destination stores its repositories
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DestinationKind {
    /// Repositories live under a local (or locally mounted) directory
    Local { path: String },

    /// Repositories live in an S3-compatible bucket
    S3 {
        bucket: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,

        /// Endpoint host, like `s3.eu-central-1.amazonaws.com`. Falls back to the configured default.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
}

impl DestinationKind {
    /// Region to pass to Restic's S3 backend, if any
    pub fn region(&self) -> Option<&str> {
        match self {
            DestinationKind::S3 { region, .. } => region.as_deref(),
            DestinationKind::Local { .. } => None,
        }
    }
}

/// A directory that gets backed up into a repository at some destination
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Filesystem {
    pub id: String,

    /// Display name
    pub name: String,

    /// Directory to back up
    pub source_path: String,

    /// ID of the destination holding this filesystem's repository
    pub destination_id: String,

    /// Path component appended to the destination to locate the repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_suffix: Option<String>,

    /// Full repository URL, overriding the one derived from the destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

impl Filesystem {
    /// Computes the Restic repository URL for this filesystem when stored at `destination`.
    pub fn repository(&self, destination: &Destination, default_endpoint: &str) -> String {
        if let Some(repo) = self.repo.as_deref().filter(|repo| !repo.is_empty()) {
            return repo.to_string();
        }

        let suffix = [self.repo_suffix.as_deref(), Some(self.name.as_str())]
            .iter()
            .flatten()
            .find(|s| !s.is_empty())
            .copied()
            .unwrap_or(self.id.as_str());

        match &destination.kind {
            DestinationKind::Local { path } => {
                format!("{}/{}", path.trim_end_matches('/'), suffix)
            }
            DestinationKind::S3 {
                bucket,
                prefix,
                endpoint,
                ..
            } => {
                let endpoint = endpoint
                    .as_deref()
                    .filter(|e| !e.is_empty())
                    .unwrap_or(default_endpoint);
                let prefix = prefix.as_deref().unwrap_or("").trim_matches('/');
                if prefix.is_empty() {
                    format!("s3:{}/{}/{}", endpoint, bucket, suffix)
                } else {
                    format!("s3:{}/{}/{}/{}", endpoint, bucket, prefix, suffix)
                }
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    #[serde(default)]
    pub destinations: Vec<Destination>,

    #[serde(default)]
    pub filesystems: Vec<Filesystem>,
}

impl Inventory {
    pub fn filesystem(&self, id: &str) -> Option<&Filesystem> {
        self.filesystems.iter().find(|fs| fs.id == id)
    }

    pub fn destination(&self, id: &str) -> Option<&Destination> {
        self.destinations.iter().find(|dest| dest.id == id)
    }

    fn filesystem_mut(&mut self, id: &str) -> Option<&mut Filesystem> {
        self.filesystems.iter_mut().find(|fs| fs.id == id)
    }

    fn destination_mut(&mut self, id: &str) -> Option<&mut Destination> {
        self.destinations.iter_mut().find(|dest| dest.id == id)
    }

    fn check_destination_exists(&self, id: &str) -> Result<(), InventoryError> {
        match self.destination(id) {
            Some(_) => Ok(()),
            None => Err(InventoryError::UnknownDestination(id.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("filesystem {0} not found")]
    FilesystemNotFound(String),

    #[error("destination {0} not found")]
    DestinationNotFound(String),

    #[error("filesystem id {0} already exists")]
    DuplicateFilesystem(String),

    #[error("destination id {0} already exists")]
    DuplicateDestination(String),

    #[error("destination {0} does not exist")]
    UnknownDestination(String),

    #[error("destination {id} is still used by filesystems: {}", .filesystems.join(", "))]
    DestinationInUse { id: String, filesystems: Vec<String> },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// File-backed inventory. Every mutation reloads the file, applies the change and writes it back
/// while holding a lock, so concurrent API calls cannot lose each other's updates.
pub struct InventoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl InventoryStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> InventoryStore {
        InventoryStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current inventory. A missing file is an empty inventory.
    pub fn load(&self) -> Result<Inventory, InventoryError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read()?)
    }

    /// Looks up a filesystem together with its destination.
    pub fn lookup(&self, fs_id: &str) -> Result<(Filesystem, Destination), InventoryError> {
        let inventory = self.load()?;
        let filesystem = inventory
            .filesystem(fs_id)
            .ok_or_else(|| InventoryError::FilesystemNotFound(fs_id.to_string()))?;
        let destination = inventory
            .destination(&filesystem.destination_id)
            .ok_or_else(|| InventoryError::DestinationNotFound(filesystem.destination_id.clone()))?;
        Ok((filesystem.clone(), destination.clone()))
    }

    pub fn add_filesystem(&self, filesystem: Filesystem) -> Result<(), InventoryError> {
        self.update(|inventory| {
            if inventory.filesystem(&filesystem.id).is_some() {
                return Err(InventoryError::DuplicateFilesystem(filesystem.id));
            }
            inventory.check_destination_exists(&filesystem.destination_id)?;
            inventory.filesystems.push(filesystem);
            Ok(())
        })
    }

    /// Replaces the filesystem with the same ID. `repo_suffix` and `repo` left unset keep their stored values, so an
    /// edit never moves the filesystem to another repository by omission.
    pub fn update_filesystem(&self, mut filesystem: Filesystem) -> Result<(), InventoryError> {
        self.update(|inventory| {
            inventory.check_destination_exists(&filesystem.destination_id)?;
            match inventory.filesystem_mut(&filesystem.id) {
                Some(existing) => {
                    if filesystem.repo_suffix.is_none() {
                        filesystem.repo_suffix = existing.repo_suffix.take();
                    }
                    if filesystem.repo.is_none() {
                        filesystem.repo = existing.repo.take();
                    }
                    *existing = filesystem;
                    Ok(())
                }
                None => Err(InventoryError::FilesystemNotFound(filesystem.id)),
            }
        })
    }

    /// Removes a filesystem from the inventory. Its repository is left as-is.
    pub fn remove_filesystem(&self, fs_id: &str) -> Result<Filesystem, InventoryError> {
        self.update(|inventory| {
            let index = inventory
                .filesystems
                .iter()
                .position(|fs| fs.id == fs_id)
                .ok_or_else(|| InventoryError::FilesystemNotFound(fs_id.to_string()))?;
            Ok(inventory.filesystems.remove(index))
        })
    }

    pub fn add_destination(&self, destination: Destination) -> Result<(), InventoryError> {
        self.update(|inventory| {
            if inventory.destination(&destination.id).is_some() {
                return Err(InventoryError::DuplicateDestination(destination.id));
            }
            inventory.destinations.push(destination);
            Ok(())
        })
    }

    /// Replaces the destination with the same ID.
    pub fn update_destination(&self, destination: Destination) -> Result<(), InventoryError> {
        self.update(|inventory| match inventory.destination_mut(&destination.id) {
            Some(existing) => {
                *existing = destination;
                Ok(())
            }
            None => Err(InventoryError::DestinationNotFound(destination.id)),
        })
    }

    /// Removes a destination that no filesystem refers to. Repositories stored there are left as-is.
    pub fn remove_destination(&self, dest_id: &str) -> Result<Destination, InventoryError> {
        self.update(|inventory| {
            let index = inventory
                .destinations
                .iter()
                .position(|dest| dest.id == dest_id)
                .ok_or_else(|| InventoryError::DestinationNotFound(dest_id.to_string()))?;

            let users: Vec<String> = inventory
                .filesystems
                .iter()
                .filter(|fs| fs.destination_id == dest_id)
                .map(|fs| fs.id.clone())
                .collect();
            if !users.is_empty() {
                return Err(InventoryError::DestinationInUse {
                    id: dest_id.to_string(),
                    filesystems: users,
                });
            }

            Ok(inventory.destinations.remove(index))
        })
    }

    fn update<T, F>(&self, f: F) -> Result<T, InventoryError>
    where
        F: FnOnce(&mut Inventory) -> Result<T, InventoryError>,
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut inventory = self.read()?;
        let result = f(&mut inventory)?;
        self.write(&inventory)?;
        Ok(result)
    }

    fn read(&self) -> anyhow::Result<Inventory> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Inventory::default()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Could not read inventory file {}", self.path.display())
                })
            }
        };

        toml::from_str(&contents)
            .with_context(|| format!("Could not parse inventory file {}", self.path.display()))
    }

    fn write(&self, inventory: &Inventory) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(inventory).context("Could not serialize inventory")?;
        write_atomically(&self.path, contents.as_bytes())
            .with_context(|| format!("Could not write inventory file {}", self.path.display()))
    }
}

/// Writes `contents` to a temporary file next to `path`, then renames it into place.
pub fn write_atomically(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("Could not create directory {}", dir.display()))?;

    let mut file = NamedTempFile::new_in(dir).context("Could not create temporary file")?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}
