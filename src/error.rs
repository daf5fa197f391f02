//! Error types for the BookLibrary server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// SQLSTATE raised by PostgreSQL for foreign key violations
const FOREIGN_KEY_VIOLATION: &str = "23503";
/// SQLSTATE raised by PostgreSQL for unique violations
const UNIQUE_VIOLATION: &str = "23505";

/// Stable error codes returned to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthenticated = 2,
    Forbidden = 3,
    DbFailure = 4,
    NotFound = 5,
    BadValue = 6,
    Duplicate = 7,
    StaleVersion = 8,
    InUse = 9,
    StorageFailure = 10,
    Cancelled = 11,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    #[error("Referential integrity: {0}")]
    ReferentialIntegrity(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Status and code for this error
    pub fn classify(&self) -> (StatusCode, ErrorCode) {
        match self {
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthenticated),
            AppError::Authorization(_) => (StatusCode::FORBIDDEN, ErrorCode::Forbidden),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, ErrorCode::BadValue),
            AppError::Concurrency(_) => (StatusCode::CONFLICT, ErrorCode::StaleVersion),
            AppError::ReferentialIntegrity(_) => (StatusCode::CONFLICT, ErrorCode::InUse),
            AppError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::StorageFailure),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::DbFailure),
            AppError::Conflict(_) => (StatusCode::CONFLICT, ErrorCode::Duplicate),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, ErrorCode::BadValue),
            AppError::Cancelled => (StatusCode::REQUEST_TIMEOUT, ErrorCode::Cancelled),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Failure),
        }
    }

    /// Message safe to show to a client. Storage and database details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Authentication(msg)
            | AppError::Authorization(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::Concurrency(msg)
            | AppError::ReferentialIntegrity(msg)
            | AppError::Conflict(msg)
            | AppError::BadRequest(msg) => msg.clone(),
            AppError::Storage(_) => "File storage error".to_string(),
            AppError::Database(_) => "Database error".to_string(),
            AppError::Cancelled => "Request cancelled".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Translate a write failure: foreign key violations become `on_foreign_key`,
    /// unique violations become `Conflict`, everything else stays a database error.
    pub fn from_constraint(e: sqlx::Error, on_foreign_key: AppError) -> AppError {
        let code = e
            .as_database_error()
            .and_then(|d| d.code().map(|c| c.into_owned()));
        match code.as_deref() {
            Some(FOREIGN_KEY_VIOLATION) => on_foreign_key,
            Some(UNIQUE_VIOLATION) => {
                AppError::Conflict("A record with the same unique value already exists".to_string())
            }
            _ => AppError::Database(e),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => msg.to_string(),
                    None => format!("Invalid value for {}", field),
                })
            })
            .collect();
        messages.sort();
        AppError::Validation(messages.join("; "))
    }
}

/// Error response body
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: String) -> Self {
        Self {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(e) => tracing::error!("Database error: {:?}", e),
            AppError::Storage(msg) => tracing::error!("Storage error: {}", msg),
            AppError::Internal(msg) => tracing::error!("Internal error: {}", msg),
            _ => {}
        }

        let (status, code) = self.classify();
        let mut response = (status, Json(ErrorResponse::new(code, self.public_message()))).into_response();
        // Picked up by the localization stage to render the message in the request culture
        response.extensions_mut().insert(code);
        response
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_status_codes() {
        assert_eq!(AppError::Validation("x".into()).classify().0, StatusCode::BAD_REQUEST);
        assert_eq!(AppError::NotFound("x".into()).classify().0, StatusCode::NOT_FOUND);
        assert_eq!(AppError::Concurrency("x".into()).classify().0, StatusCode::CONFLICT);
        assert_eq!(
            AppError::ReferentialIntegrity("x".into()).classify(),
            (StatusCode::CONFLICT, ErrorCode::InUse)
        );
        assert_eq!(AppError::Authentication("x".into()).classify().0, StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Authorization("x".into()).classify().0, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_storage_details_are_not_exposed() {
        let err = AppError::Storage("failed to open /var/lib/booklibrary/ab/abcdef".into());
        assert_eq!(err.public_message(), "File storage error");
        assert!(!err.public_message().contains("/var/lib"));
    }

    #[test]
    fn test_non_constraint_error_stays_database() {
        let err = AppError::from_constraint(sqlx::Error::RowNotFound, AppError::Validation("fk".into()));
        assert!(matches!(err, AppError::Database(sqlx::Error::RowNotFound)));
    }

    #[test]
    fn test_response_carries_error_code() {
        let response = AppError::Concurrency("stale".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.extensions().get::<ErrorCode>(), Some(&ErrorCode::StaleVersion));
    }
}
