//! Typed errors and their mapping onto the API envelope.

use crate::response;
use crate::validation::FieldErrors;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};
use thiserror::Error;

/// Postgres SQLSTATE for `foreign_key_violation`.
const FOREIGN_KEY_VIOLATION: &str = "23503";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("config: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("invalid input")]
    Validation(FieldErrors),
    #[error("{0}")]
    Internal(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("storage: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn not_found() -> Self {
        AppError::NotFound("Not Found".into())
    }

    pub fn unauthenticated() -> Self {
        AppError::Unauthenticated("Unauthenticated".into())
    }

    /// Rewrites a foreign-key violation raised while deleting into the
    /// message clients expect; anything else passes through.
    pub fn on_delete(self) -> Self {
        match &self {
            AppError::Db(sqlx::Error::Database(db))
                if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) =>
            {
                AppError::Internal("This item cannot be deleted, has data associated.".into())
            }
            _ => self,
        }
    }

    /// Unique violations on insert/update become 409.
    pub fn on_write(self) -> Self {
        match &self {
            AppError::Db(sqlx::Error::Database(db))
                if db.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                AppError::Conflict("The item already exists.".into())
            }
            _ => self,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Db(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(errors) => response::response422(errors),
            AppError::Db(sqlx::Error::RowNotFound) => response::response404(Map::new(), None),
            AppError::Db(e) => {
                tracing::error!(error = %e, "database error");
                response::response500(Map::new(), None)
            }
            AppError::Config(e) => {
                tracing::error!(error = %e, "configuration error");
                response::response500(Map::new(), None)
            }
            AppError::Io(e) => {
                tracing::error!(error = %e, "storage error");
                response::response500(Map::new(), None)
            }
            other => {
                let status = other.status();
                if status.is_server_error() {
                    tracing::error!(error = %other, "request failed");
                }
                response::respond(status, &other.to_string(), Map::<String, Value>::new())
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_the_error_kind() {
        assert_eq!(AppError::not_found().status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::unauthenticated().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Validation(FieldErrors::default()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::Db(sqlx::Error::RowNotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Db(sqlx::Error::PoolTimedOut).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        assert_eq!(AppError::from(io).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn on_delete_leaves_other_errors_untouched() {
        let err = AppError::not_found().on_delete();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = AppError::BadRequest("x".into()).on_write();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(AppError::Conflict("dup".into()).status(), StatusCode::CONFLICT);
    }
}
