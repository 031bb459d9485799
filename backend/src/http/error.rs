//! HTTP error handling and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::repository::RepositoryError;
use crate::services::ImportError;

/// API error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Resource not found
    NotFound(String),
    /// Invalid request (validation error)
    BadRequest(String),
    /// Internal server error
    Internal(String),
    /// Repository error
    Repository(RepositoryError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Repository(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            AppError::Repository(RepositoryError::ValidationError { .. }) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            AppError::NotFound(msg) => ApiError::new("NOT_FOUND", msg),
            AppError::BadRequest(msg) => ApiError::new("BAD_REQUEST", msg),
            AppError::Internal(msg) => {
                log::error!("Internal error: {}", msg);
                ApiError::new("INTERNAL_ERROR", msg)
            }
            AppError::Repository(e) => {
                let code = match status {
                    StatusCode::NOT_FOUND => "NOT_FOUND",
                    StatusCode::BAD_REQUEST => "BAD_REQUEST",
                    _ => {
                        log::error!("Repository error: {}", e);
                        "REPOSITORY_ERROR"
                    }
                };
                let context = e.context().to_string();
                let error = ApiError::new(code, e.message());
                if context.is_empty() {
                    error
                } else {
                    error.with_details(context.trim().trim_matches(['[', ']']))
                }
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        AppError::Repository(err)
    }
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::BadRequest(msg) => AppError::BadRequest(msg),
            ImportError::NotFound(msg) => AppError::NotFound(msg),
            ImportError::Repository(e) => AppError::Repository(e),
            e @ (ImportError::UnsupportedFormat(_)
            | ImportError::Spreadsheet(_)
            | ImportError::Csv(_)
            | ImportError::Json(_)) => AppError::BadRequest(e.to_string()),
            e => AppError::Internal(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::BadRequest(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_errors_map_to_client_errors() {
        let bad: AppError = ImportError::bad_request("File is empty").into();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let missing: AppError = ImportError::not_found("Source RADAR not found").into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let format: AppError = ImportError::UnsupportedFormat("shp".into()).into();
        assert_eq!(format.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_repository_errors_keep_their_kind() {
        let missing: AppError = RepositoryError::entity_not_found("station", 7).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let invalid: AppError = RepositoryError::validation("No fields to update").into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let down: AppError = RepositoryError::connection("pool exhausted").into();
        assert_eq!(down.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
