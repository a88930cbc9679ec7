use crate::services::{assets::AssetError, media_service::MediaError, staging::StagingError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

/// HTTP-facing error: a status and a short message safe to show callers.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Internal detail of upload and storage failures is logged here and never
/// sent to the caller.
impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Validation(msg) => AppError::bad_request(msg),
            MediaError::Unauthenticated => AppError::unauthorized("authentication required"),
            MediaError::Forbidden => {
                AppError::new(StatusCode::FORBIDDEN, "you do not own this video")
            }
            MediaError::NotFound(_) => AppError::not_found("video not found"),
            MediaError::Conflict(_) => AppError::new(
                StatusCode::CONFLICT,
                "video was modified concurrently, reload and retry",
            ),
            MediaError::Upload(source) => {
                error!(error = %source, "asset upload failed");
                AppError::new(StatusCode::BAD_GATEWAY, "failed to store uploaded file")
            }
            MediaError::Storage(source) => {
                error!(error = %source, "record store failed");
                AppError::internal("storage unavailable")
            }
        }
    }
}

impl From<StagingError> for AppError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::Multipart(err) => AppError::new(err.status(), err.body_text()),
            StagingError::Io(err) => {
                error!(error = %err, "failed to stage upload");
                AppError::internal("failed to receive upload")
            }
        }
    }
}

impl From<AssetError> for AppError {
    fn from(err: AssetError) -> Self {
        match err {
            AssetError::NotFound(_) | AssetError::InvalidKey => AppError::not_found("asset not found"),
            other => {
                error!(error = %other, "asset read failed");
                AppError::internal("storage unavailable")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
