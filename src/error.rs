use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is not allowed in the current state (e.g. submitting a
    /// quiz answer before one was selected, or claiming an unfinished track).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Storage temporarily unavailable: {0}")]
    Transient(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl AppError {
    pub fn not_found(entity: &str, id: Uuid) -> Self {
        AppError::NotFound(format!("{} {}", entity, id))
    }

    /// Maps a storage error for a lookup of `entity` by `id`, keeping
    /// "does not exist" distinct from "could not check".
    pub fn from_lookup(entity: &'static str, id: Uuid) -> impl FnOnce(DatabaseError) -> AppError {
        move |err| match err {
            DatabaseError::NotFound => AppError::not_found(entity, id),
            DatabaseError::Transient(msg) => AppError::Transient(msg),
            other => AppError::Database(other),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Transient(_) => true,
            AppError::Database(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref err) => match err {
                DatabaseError::NotFound => (StatusCode::NOT_FOUND, "Resource not found"),
                DatabaseError::Duplicate => (StatusCode::CONFLICT, "Resource already exists"),
                DatabaseError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "Invalid input data"),
                DatabaseError::Transient(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable, please retry",
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred",
                ),
            },
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "Resource not found"),
            AppError::InvalidState(_) => (StatusCode::CONFLICT, "Operation not allowed"),
            AppError::Transient(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable, please retry",
            ),
            AppError::InternalServerError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred",
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        // Storage and internal details stay in the logs.
        let details = match &self {
            AppError::Validation(msg) | AppError::NotFound(msg) | AppError::InvalidState(msg) => {
                Some(msg.clone())
            }
            _ => None,
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "details": details,
                "retryable": self.is_retryable(),
            }
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_errors_keep_missing_and_unavailable_apart() {
        let id = Uuid::new_v4();
        let missing = AppError::from_lookup("video", id)(DatabaseError::NotFound);
        assert!(matches!(missing, AppError::NotFound(_)));
        assert!(!missing.is_retryable());

        let down = AppError::from_lookup("video", id)(DatabaseError::Transient("timeout".into()));
        assert!(matches!(down, AppError::Transient(_)));
        assert!(down.is_retryable());
    }

    #[test]
    fn transient_maps_to_service_unavailable() {
        let response = AppError::Transient("pool timed out".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = AppError::Validation("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
