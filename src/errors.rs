use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Error kinds per spec.md 7. Each carries enough context to log, but the
/// HTTP layer never forwards the inner detail of Upstream/Storage errors
/// to the client.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Auth,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("parse failure: {0}")]
    Parse(String),
}

#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Conflict,
    NotFound,
    Io,
    Constraint,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == StorageErrorKind::Conflict
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => StorageError::new(StorageErrorKind::NotFound, e.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::new(StorageErrorKind::Conflict, e.to_string())
            }
            sqlx::Error::Database(_) => {
                StorageError::new(StorageErrorKind::Constraint, e.to_string())
            }
            sqlx::Error::Io(_) => StorageError::new(StorageErrorKind::Io, e.to_string()),
            _ => StorageError::new(StorageErrorKind::Io, e.to_string()),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Storage(StorageError::from(e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::Auth => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Upstream(_) => (
                StatusCode::BAD_GATEWAY,
                "upstream service unavailable".to_string(),
            ),
            AppError::Storage(e) => match e.kind {
                StorageErrorKind::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
                StorageErrorKind::Conflict => (StatusCode::CONFLICT, "conflict".to_string()),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal storage error".to_string(),
                ),
            },
            AppError::Parse(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "could not parse message".to_string(),
            ),
        };

        if matches!(
            self,
            AppError::Storage(_) | AppError::Upstream(_) | AppError::Parse(_)
        ) {
            tracing::warn!(error = %self, "request failed");
        }

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}
