//! Error type for API handlers. Every error is rendered as a plain-text body so the UI can show it as-is.

use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::inventory::InventoryError;
use crate::restore::RestoreTargetError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Subprocess or storage failures
    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type(ContentType::plaintext())
            .body(self.to_string())
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::FilesystemNotFound(_) | InventoryError::DestinationNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            InventoryError::DuplicateFilesystem(_)
            | InventoryError::DuplicateDestination(_)
            | InventoryError::DestinationInUse { .. } => ApiError::Conflict(err.to_string()),
            InventoryError::UnknownDestination(_) => ApiError::BadRequest(err.to_string()),
            InventoryError::Storage(err) => ApiError::Internal(err),
        }
    }
}

impl From<RestoreTargetError> for ApiError {
    fn from(err: RestoreTargetError) -> Self {
        match err {
            RestoreTargetError::OutsideRoot { .. } => ApiError::BadRequest(err.to_string()),
            RestoreTargetError::Io(_) => ApiError::Internal(err.into()),
        }
    }
}
