use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{
    connection::ConnectionError, db::StoreError, media::MediaError, normalize::NormalizeError,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Slug must contain only lowercase letters, numbers, and hyphens")]
    InvalidSlug,

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("{0}")]
    Validation(String),

    #[error("No event found with slug: {0}")]
    NotFound(String),

    #[error("An event with slug {0:?} already exists")]
    Conflict(String),

    #[error("Unable to connect to database: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Image upload failed: {0}")]
    Media(#[from] MediaError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn label(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "Bad request",
            AppError::InvalidSlug => "Invalid slug format",
            AppError::Normalize(_) | AppError::Validation(_) => "Validation error",
            AppError::NotFound(_) => "Event not found",
            AppError::Conflict(_) => "Duplicate event",
            AppError::Connection(_) => "Database connection failed",
            AppError::Media(_) => "Image upload failed",
            AppError::Internal(_) => "Internal server error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)
            | AppError::InvalidSlug
            | AppError::Normalize(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Media(MediaError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Media(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Normalize(err) => AppError::Normalize(err),
            StoreError::Validation(message) => AppError::Validation(message),
            StoreError::DuplicateSlug(slug) => AppError::Conflict(slug),
            StoreError::EventNotFound(slug) => AppError::NotFound(slug),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid form data: {err}"))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(format!("Invalid JSON data format: {}", rejection.body_text()))
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        AppError::BadRequest(format!("Invalid form data: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(format!("Invalid path: {}", rejection.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, "request failed: {self}");
        }

        let body = json!({
            "error": self.label(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
