//! API request handlers

use std::path::Path;

use actix_web::http::header::ContentType;
use actix_web::{web, HttpResponse};
use slog::{error, info};

use super::error::ApiError;
use super::models::{
    BucketRequest, BucketResponse, DestinationRequest, FilesystemRequest, JobResponse, RestoreRequest,
    StatusResponse, UiSettings,
};
use super::state::AppState;
use crate::aws::Aws;
use crate::jobs::JobKind;
use crate::restic::Restic;
use crate::restore::resolve_restore_target;

const INDEX_HTML: &str = include_str!("../../static/index.html");

type ApiResult = Result<HttpResponse, ApiError>;

pub async fn index() -> HttpResponse {
    HttpResponse::Ok().content_type(ContentType::html()).body(INDEX_HTML)
}

pub async fn ui_settings(state: web::Data<AppState>) -> HttpResponse {
    let settings = &state.settings;
    HttpResponse::Ok().json(UiSettings {
        restore_root: settings.paths.restore_root.display().to_string(),
        aws_default_region: settings.aws.default_region.clone(),
        aws_default_endpoint: settings.aws.default_endpoint.clone(),
    })
}

// =============================================================================
// Filesystems
// =============================================================================

pub async fn list_filesystems(state: web::Data<AppState>) -> ApiResult {
    let inventory = state.inventory.load()?;
    Ok(HttpResponse::Ok().json(inventory.filesystems))
}

pub async fn create_filesystem(
    state: web::Data<AppState>,
    request: web::Json<FilesystemRequest>,
) -> ApiResult {
    let filesystem = request.into_inner().into_filesystem(None)?;
    let id = filesystem.id.clone();
    state.inventory.add_filesystem(filesystem)?;
    info!(state.logger, "Added filesystem"; "filesystem" => id);
    Ok(HttpResponse::Ok().json(StatusResponse::ok()))
}

pub async fn update_filesystem(
    state: web::Data<AppState>,
    fs_id: web::Path<String>,
    request: web::Json<FilesystemRequest>,
) -> ApiResult {
    let filesystem = request.into_inner().into_filesystem(Some(fs_id.into_inner()))?;
    let id = filesystem.id.clone();
    state.inventory.update_filesystem(filesystem)?;
    info!(state.logger, "Updated filesystem"; "filesystem" => id);
    Ok(HttpResponse::Ok().json(StatusResponse::ok()))
}

pub async fn delete_filesystem(state: web::Data<AppState>, fs_id: web::Path<String>) -> ApiResult {
    let removed = state.inventory.remove_filesystem(&fs_id)?;
    info!(state.logger, "Removed filesystem, repository left in place"; "filesystem" => removed.id);
    Ok(HttpResponse::NoContent().finish())
}

// =============================================================================
// Destinations
// =============================================================================

pub async fn list_destinations(state: web::Data<AppState>) -> ApiResult {
    let inventory = state.inventory.load()?;
    Ok(HttpResponse::Ok().json(inventory.destinations))
}

pub async fn create_destination(
    state: web::Data<AppState>,
    request: web::Json<DestinationRequest>,
) -> ApiResult {
    let destination = request.into_inner().into_destination(None)?;
    let id = destination.id.clone();
    state.inventory.add_destination(destination)?;
    info!(state.logger, "Added destination"; "destination" => id);
    Ok(HttpResponse::Ok().json(StatusResponse::ok()))
}

pub async fn update_destination(
    state: web::Data<AppState>,
    dest_id: web::Path<String>,
    request: web::Json<DestinationRequest>,
) -> ApiResult {
    let destination = request.into_inner().into_destination(Some(dest_id.into_inner()))?;
    let id = destination.id.clone();
    state.inventory.update_destination(destination)?;
    info!(state.logger, "Updated destination"; "destination" => id);
    Ok(HttpResponse::Ok().json(StatusResponse::ok()))
}

pub async fn delete_destination(state: web::Data<AppState>, dest_id: web::Path<String>) -> ApiResult {
    let removed = state.inventory.remove_destination(&dest_id)?;
    info!(state.logger, "Removed destination, repositories left in place"; "destination" => removed.id);
    Ok(HttpResponse::NoContent().finish())
}

// =============================================================================
// Restic operations
// =============================================================================

pub async fn run_backup(state: web::Data<AppState>, fs_id: web::Path<String>) -> ApiResult {
    let (filesystem, destination) = state.inventory.lookup(&fs_id)?;
    let log_path = state.operation_log(&filesystem.id, "backup");
    let restic = Restic::for_filesystem(&state.settings, &state.logger, &filesystem, &destination, log_path);

    let job_id = state.jobs.start(JobKind::Backup, &filesystem.id, restic.log_path())?;
    let outcome = restic.backup(&filesystem.source_path).await;
    record_outcome(&state, &job_id, &outcome);

    Ok(HttpResponse::Ok().json(JobResponse {
        job_id,
        summary: outcome?,
    }))
}

pub async fn run_restore(
    state: web::Data<AppState>,
    fs_id: web::Path<String>,
    request: web::Json<RestoreRequest>,
) -> ApiResult {
    let (snapshot_id, target_path) = request.into_inner().validate()?;
    let (filesystem, destination) = state.inventory.lookup(&fs_id)?;
    let target = resolve_restore_target(&state.settings.paths.restore_root, Path::new(&target_path))?;

    let log_path = state.operation_log(&filesystem.id, "restore");
    let restic = Restic::for_filesystem(&state.settings, &state.logger, &filesystem, &destination, log_path);

    let job_id = state.jobs.start(JobKind::Restore, &filesystem.id, restic.log_path())?;
    let outcome = restic.restore(&snapshot_id, &target).await;
    record_outcome(&state, &job_id, &outcome);

    Ok(HttpResponse::Ok().json(JobResponse {
        job_id,
        summary: outcome?,
    }))
}

/// Stores a job's outcome. The operation already ran, so failing to write the history is only logged.
fn record_outcome<T: serde::Serialize>(state: &AppState, job_id: &str, outcome: &anyhow::Result<T>) {
    if let Err(err) = state.jobs.finish(job_id, outcome) {
        error!(state.logger, "Could not record job outcome"; "job" => job_id, "error" => %err);
    }
}

pub async fn list_snapshots(state: web::Data<AppState>, fs_id: web::Path<String>) -> ApiResult {
    let (filesystem, destination) = state.inventory.lookup(&fs_id)?;
    let log_path = state.operation_log(&filesystem.id, "snapshots");
    let restic = Restic::for_filesystem(&state.settings, &state.logger, &filesystem, &destination, log_path);

    let snapshots = restic.snapshots_json().await?;
    Ok(HttpResponse::Ok().content_type(ContentType::json()).body(snapshots))
}

pub async fn list_jobs(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.jobs.list())
}

pub async fn get_job(state: web::Data<AppState>, job_id: web::Path<String>) -> ApiResult {
    match state.jobs.get(&job_id) {
        Some(job) => Ok(HttpResponse::Ok().json(job)),
        None => Err(ApiError::NotFound(format!("Job {} not found", job_id))),
    }
}

// =============================================================================
// S3
// =============================================================================

pub async fn create_bucket(state: web::Data<AppState>, request: web::Json<BucketRequest>) -> ApiResult {
    let spec = request.into_inner().into_spec()?;
    let aws = Aws::new(&state.settings.aws, &state.logger, state.operation_log("s3", "bucket"));
    aws.create_bucket(&spec).await?;

    Ok(HttpResponse::Ok().json(BucketResponse {
        status: "ok",
        bucket: spec.name,
    }))
}
