//! HTTP API server
//!
//! Serves the single-page UI and the JSON endpoints it calls. Uses Actix-web for the HTTP server.

mod error;
mod handlers;
mod models;
mod state;

pub use error::ApiError;
pub use state::AppState;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use slog::info;

/// Configure API routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    use handlers::*;

    cfg.route("/", web::get().to(index)).service(
        web::scope("/api")
            .route("/settings", web::get().to(ui_settings))
            // Inventory
            .route("/filesystems", web::get().to(list_filesystems))
            .route("/filesystems", web::post().to(create_filesystem))
            .route("/filesystems/{fs_id}", web::put().to(update_filesystem))
            .route("/filesystems/{fs_id}", web::delete().to(delete_filesystem))
            .route("/destinations", web::get().to(list_destinations))
            .route("/destinations", web::post().to(create_destination))
            .route("/destinations/{dest_id}", web::put().to(update_destination))
            .route("/destinations/{dest_id}", web::delete().to(delete_destination))
            // Restic
            .route("/backup/{fs_id}", web::post().to(run_backup))
            .route("/restore/{fs_id}", web::post().to(run_restore))
            .route("/snapshots/{fs_id}", web::get().to(list_snapshots))
            .route("/jobs", web::get().to(list_jobs))
            .route("/jobs/{job_id}", web::get().to(get_job))
            // S3
            .route("/s3/buckets", web::post().to(create_bucket)),
    );
}

/// JSON bodies are accepted regardless of content type, and malformed ones are rejected as plain text like every
/// other API error.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .content_type_required(false)
        .error_handler(|err, _req| ApiError::BadRequest(format!("invalid request body: {}", err)).into())
}

/// Runs the HTTP server until it is shut down.
pub async fn serve(state: web::Data<AppState>) -> Result<()> {
    let host = state.settings.server.host.clone();
    let port = state.settings.server.port;
    info!(state.logger, "Starting HTTP server"; "host" => &host, "port" => port);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(json_config())
            .configure(configure_routes)
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("Could not bind to {}:{}", host, port))?
    .run()
    .await
    .context("HTTP server failed")
}
