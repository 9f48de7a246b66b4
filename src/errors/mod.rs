//! Error handling module for the shelter backend.
//!
//! Provides centralized error types with mapping to HTTP status codes and response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::kv::KvError;

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const AUTH_REQUIRED: &str = "AUTH_REQUIRED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const CONFLICT: &str = "CONFLICT";
    pub const REMOTE_STORE_ERROR: &str = "REMOTE_STORE_ERROR";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const NOT_LOADED: &str = "NOT_LOADED";
    pub const UPSTREAM_TIMEOUT: &str = "UPSTREAM_TIMEOUT";
    pub const UPSTREAM_FORMAT: &str = "UPSTREAM_FORMAT";
    pub const UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
}

/// Application error type.
///
/// Cloneable so a single upstream outcome can be handed to every caller
/// waiting on a coalesced fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Missing or invalid service API key
    Unauthorized(String),
    /// A user action was attempted without a signed-in user
    AuthRequired(String),
    /// Resource not found
    NotFound(String),
    /// Validation error
    Validation(String),
    /// Concurrent writers kept invalidating a compare-and-swap
    Conflict(String),
    /// Remote document store failure
    RemoteStore(String),
    /// Device-local storage failure
    Storage(String),
    /// Local favorites were touched before the persisted snapshot was restored
    NotLoaded(String),
    /// Upstream open-data request exceeded its deadline
    UpstreamTimeout(String),
    /// Upstream open-data response was not a record array
    UpstreamFormat(String),
    /// Any other upstream failure (connection, HTTP status)
    Upstream(String),
    /// Internal server error
    Internal(String),
    /// Bad request
    BadRequest(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::AuthRequired(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RemoteStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotLoaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::UpstreamFormat(_) => StatusCode::BAD_GATEWAY,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => codes::UNAUTHORIZED,
            AppError::AuthRequired(_) => codes::AUTH_REQUIRED,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::Conflict(_) => codes::CONFLICT,
            AppError::RemoteStore(_) => codes::REMOTE_STORE_ERROR,
            AppError::Storage(_) => codes::STORAGE_ERROR,
            AppError::NotLoaded(_) => codes::NOT_LOADED,
            AppError::UpstreamTimeout(_) => codes::UPSTREAM_TIMEOUT,
            AppError::UpstreamFormat(_) => codes::UPSTREAM_FORMAT,
            AppError::Upstream(_) => codes::UPSTREAM_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::Unauthorized(msg)
            | AppError::AuthRequired(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::Conflict(msg)
            | AppError::RemoteStore(msg)
            | AppError::Storage(msg)
            | AppError::NotLoaded(msg)
            | AppError::UpstreamTimeout(msg)
            | AppError::UpstreamFormat(msg)
            | AppError::Upstream(msg)
            | AppError::Internal(msg)
            | AppError::BadRequest(msg) => msg.clone(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<KvError> for AppError {
    fn from(err: KvError) -> Self {
        tracing::error!("Remote store error: {:?}", err);
        AppError::RemoteStore(format!("Remote store error: {}", err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::RemoteStore(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        tracing::error!("Local storage error: {:?}", err);
        AppError::Storage(format!("Local storage error: {}", err))
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(error: &AppError) -> Self {
        // Clients render a retry path for these
        let details = match error {
            AppError::UpstreamTimeout(_)
            | AppError::Upstream(_)
            | AppError::RemoteStore(_)
            | AppError::NotLoaded(_) => Some(serde_json::json!({ "retryable": true })),
            _ => None,
        };

        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
                details,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::new(&self);
        (status, Json(body)).into_response()
    }
}
