//! Request and response bodies for the JSON API

use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::aws::BucketSpec;
use crate::inventory::{Destination, DestinationKind, Filesystem};

// Requests

/// Body for creating or editing a filesystem. On edit, the ID comes from the URL.
#[derive(Debug, Default, Deserialize)]
pub struct FilesystemRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    pub source_path: Option<String>,
    pub destination_id: Option<String>,
    pub repo_suffix: Option<String>,
    pub repo: Option<String>,
}

impl FilesystemRequest {
    /// Validates the request, using `id` if given instead of the one in the body. A new filesystem's repository
    /// suffix defaults to its ID; an edit (`id` given) leaves a missing suffix unset so the stored one is kept.
    pub fn into_filesystem(self, id: Option<String>) -> Result<Filesystem, ApiError> {
        let creating = id.is_none();
        let id = valid_id(required(id.or(self.id), "id")?)?;
        let name = required(self.name, "name")?;
        let source_path = required(self.source_path, "source_path")?;
        let destination_id = required(self.destination_id, "destination_id")?;
        let mut repo_suffix = optional(self.repo_suffix);
        if creating && repo_suffix.is_none() {
            repo_suffix = Some(id.clone());
        }

        Ok(Filesystem {
            id,
            name,
            source_path,
            destination_id,
            repo_suffix,
            repo: optional(self.repo),
        })
    }
}

/// Body for creating or editing a destination. On edit, the ID comes from the URL.
#[derive(Debug, Default, Deserialize)]
pub struct DestinationRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub path: Option<String>,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
}

impl DestinationRequest {
    /// Validates the request, using `id` if given instead of the one in the body.
    pub fn into_destination(self, id: Option<String>) -> Result<Destination, ApiError> {
        let id = valid_id(required(id.or(self.id), "id")?)?;
        let name = required(self.name, "name")?;
        let kind = match required(self.kind, "type")?.as_str() {
            "local" => DestinationKind::Local {
                path: optional(self.path)
                    .ok_or_else(|| ApiError::BadRequest("local destination requires path".into()))?,
            },
            "s3" => DestinationKind::S3 {
                bucket: optional(self.bucket)
                    .ok_or_else(|| ApiError::BadRequest("s3 destination requires bucket".into()))?,
                prefix: optional(self.prefix),
                endpoint: optional(self.endpoint),
                region: optional(self.region),
            },
            _ => return Err(ApiError::BadRequest("type must be local or s3".into())),
        };

        Ok(Destination { id, name, kind })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RestoreRequest {
    pub snapshot_id: Option<String>,
    pub target_path: Option<String>,
}

impl RestoreRequest {
    /// Returns the snapshot ID and target path, both of which are required.
    pub fn validate(self) -> Result<(String, String), ApiError> {
        match (optional(self.snapshot_id), optional(self.target_path)) {
            (Some(snapshot_id), _) if snapshot_id.starts_with('-') => Err(ApiError::BadRequest(format!(
                "invalid snapshot id {}",
                snapshot_id
            ))),
            (Some(snapshot_id), Some(target_path)) => Ok((snapshot_id, target_path)),
            _ => Err(ApiError::BadRequest(
                "snapshot_id and target_path are required".into(),
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BucketRequest {
    pub name: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub profile: Option<String>,
}

impl BucketRequest {
    pub fn into_spec(self) -> Result<BucketSpec, ApiError> {
        let name = optional(self.name).ok_or_else(|| ApiError::BadRequest("name is required".into()))?;
        Ok(BucketSpec {
            name,
            region: optional(self.region),
            endpoint: optional(self.endpoint),
            profile: optional(self.profile),
        })
    }
}

// Responses

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn ok() -> Self {
        StatusResponse { status: "ok" }
    }
}

/// A finished job's ID together with its summary fields
#[derive(Debug, Serialize)]
pub struct JobResponse<T> {
    pub job_id: String,
    #[serde(flatten)]
    pub summary: T,
}

#[derive(Debug, Serialize)]
pub struct BucketResponse {
    pub status: &'static str,
    pub bucket: String,
}

/// Settings the UI needs to render its forms
#[derive(Debug, Serialize)]
pub struct UiSettings {
    pub restore_root: String,
    pub aws_default_region: String,
    pub aws_default_endpoint: String,
}

fn optional(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    optional(value).ok_or_else(|| ApiError::BadRequest(format!("missing field {}", field)))
}

/// IDs end up in log file names, so they are limited to a safe character set.
fn valid_id(id: String) -> Result<String, ApiError> {
    let safe = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if safe && !id.starts_with('.') {
        Ok(id)
    } else {
        Err(ApiError::BadRequest(format!(
            "id {} may only contain letters, digits, '-', '_' and '.'",
            id
        )))
    }
}
