//! Server error types and contract-visible error codes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for server operations
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Contract-visible error codes, carried in `job_errors.error_code` and in
/// HTTP error bodies.
pub mod codes {
    // General
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const CONFLICT: &str = "CONFLICT";
    pub const IDEMPOTENCY_CONFLICT: &str = "IDEMPOTENCY_CONFLICT";
    pub const QUEUE_FULL: &str = "QUEUE_FULL";

    // Validation - user
    pub const INVALID_UUID: &str = "INVALID_UUID";
    pub const INVALID_EMAIL: &str = "INVALID_EMAIL";
    pub const DUPLICATE_EMAIL: &str = "DUPLICATE_EMAIL";
    pub const INVALID_NAME: &str = "INVALID_NAME";
    pub const INVALID_ROLE: &str = "INVALID_ROLE";
    pub const INVALID_BOOLEAN: &str = "INVALID_BOOLEAN";
    pub const INVALID_TIMESTAMP: &str = "INVALID_TIMESTAMP";
    pub const MISSING_FIELD: &str = "MISSING_FIELD";

    // Validation - article
    pub const INVALID_SLUG: &str = "INVALID_SLUG";
    pub const DUPLICATE_SLUG: &str = "DUPLICATE_SLUG";
    pub const INVALID_TITLE: &str = "INVALID_TITLE";
    pub const INVALID_BODY: &str = "INVALID_BODY";
    pub const INVALID_AUTHOR: &str = "INVALID_AUTHOR";
    pub const INVALID_TAGS: &str = "INVALID_TAGS";
    pub const INVALID_STATUS: &str = "INVALID_STATUS";
    pub const INVALID_PUBLISHED_AT: &str = "INVALID_PUBLISHED_AT";
    pub const MISSING_PUBLISHED_AT: &str = "MISSING_PUBLISHED_AT";

    // Validation - comment
    pub const INVALID_ARTICLE: &str = "INVALID_ARTICLE";
    pub const INVALID_USER: &str = "INVALID_USER";
    pub const BODY_TOO_LONG: &str = "BODY_TOO_LONG";
    pub const BODY_EMPTY: &str = "BODY_EMPTY";

    // Duplicate / foreign-key verdicts from the bulk pass
    pub const DUPLICATE_ID: &str = "DUPLICATE_ID";
    pub const FK_VIOLATION: &str = "FK_VIOLATION";
    pub const INVALID_AUTHOR_FK: &str = "INVALID_AUTHOR_FK";
    pub const INVALID_ARTICLE_FK: &str = "INVALID_ARTICLE_FK";
    pub const INVALID_USER_FK: &str = "INVALID_USER_FK";

    // File handling
    pub const INVALID_FILE_TYPE: &str = "INVALID_FILE_TYPE";
    pub const FILE_TOO_LARGE: &str = "FILE_TOO_LARGE";
    pub const FILE_READ_ERROR: &str = "FILE_READ_ERROR";
    pub const FILE_PARSE_ERROR: &str = "FILE_PARSE_ERROR";

    // Jobs
    pub const JOB_NOT_FOUND: &str = "JOB_NOT_FOUND";
    pub const JOB_ALREADY_EXISTS: &str = "JOB_ALREADY_EXISTS";
    pub const JOB_FAILED: &str = "JOB_FAILED";
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("File too large: {0}")]
    FileTooLarge(String),

    #[error("Job queue is full")]
    QueueFull,

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Contract error code for HTTP bodies
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Io(_) | AppError::Internal(_) => {
                codes::INTERNAL_ERROR
            }
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation(_) => codes::INVALID_REQUEST,
            AppError::Conflict(_) => codes::CONFLICT,
            AppError::FileTooLarge(_) => codes::FILE_TOO_LARGE,
            AppError::QueueFull => codes::QUEUE_FULL,
            AppError::Config(_) => codes::INTERNAL_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            AppError::Io(ref e) => {
                tracing::error!("IO error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An IO error occurred".to_string(),
                )
            }
            AppError::NotFound(ref message) => (StatusCode::NOT_FOUND, message.clone()),
            AppError::Validation(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Conflict(ref message) => (StatusCode::CONFLICT, message.clone()),
            AppError::FileTooLarge(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::QueueFull => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Job queue is full, retry later".to_string(),
            ),
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            }
            AppError::Config(ref message) => {
                tracing::error!("Configuration error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server configuration error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
