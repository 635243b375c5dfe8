/// Unified error types for the vehicle portal
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Message shown whenever a record is missing or hidden from the caller.
/// Both cases share it so the response never reveals whether the record exists.
pub const ACCESS_DENIED_MESSAGE: &str =
    "Vehicle not found or you do not have permission to view it";

/// Main error type for the portal
#[derive(Error, Debug)]
pub enum PortalError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Authentication errors (bad credentials, wrong login channel, expired session)
    #[error("{0}")]
    Authentication(String),

    /// Authenticated, but the role is not allowed on this route
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Vehicle is missing or belongs to someone else
    #[error("{}", ACCESS_DENIED_MESSAGE)]
    AccessDenied,

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate username)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Too many failed logins for this identifier
    #[error("Too many failed login attempts")]
    LockedOut { retry_after: Duration },

    /// Request rate exceeded
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: Duration },

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<validator::ValidationErrors> for PortalError {
    fn from(errors: validator::ValidationErrors) -> Self {
        PortalError::Validation(errors.to_string())
    }
}

impl From<argon2::password_hash::Error> for PortalError {
    fn from(e: argon2::password_hash::Error) -> Self {
        PortalError::Internal(format!("Password hashing failed: {}", e))
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert PortalError to HTTP response
impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            PortalError::LockedOut { retry_after } | PortalError::RateLimitExceeded { retry_after } => {
                Some(retry_after.as_secs().max(1))
            }
            _ => None,
        };

        let (status, error_code, message) = match self {
            PortalError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            PortalError::Authorization(_) => {
                (StatusCode::FORBIDDEN, "Forbidden", self.to_string())
            }
            PortalError::AccessDenied => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            PortalError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            PortalError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            PortalError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            PortalError::LockedOut { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "LockedOut",
                format!(
                    "Too many failed login attempts. Try again in {} seconds",
                    retry_after.as_secs().max(1)
                ),
            ),
            PortalError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded",
                "Rate limit exceeded".to_string(),
            ),
            PortalError::Database(ref e) => {
                tracing::error!(error = %e, "data store failure");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ServiceUnavailable",
                    "Service temporarily unavailable".to_string(),
                )
            }
            PortalError::Internal(ref e) => {
                tracing::error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error".to_string(),
                )
            }
            PortalError::Io(ref e) => {
                tracing::error!(error = %e, "io error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for portal operations
pub type PortalResult<T> = Result<T, PortalError>;
