//! Unified error handling.
//!
//! Provides a single error type shared by the auth core and the HTTP gateway,
//! with a stable machine code and exactly one HTTP status per kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::DomainError;
use serde::Serialize;
use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    // Credential errors
    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Invalid email or password")]
    InvalidEmailOrPassword,

    #[error("Password hashing failed: {0}")]
    HashingFailure(String),

    // Refresh token lifecycle
    #[error("Refresh token not found")]
    TokenNotFound,

    #[error("Refresh token revoked")]
    TokenRevoked,

    #[error("Refresh token expired")]
    TokenExpired,

    #[cfg(feature = "jwt")]
    #[error("Invalid token")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    // Transport-level authentication
    #[error("Authentication required")]
    Unauthorized,

    // Resource errors
    #[error("Resource not found")]
    NotFound,

    // Validation
    #[error("{0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Operation timed out")]
    Timeout,

    // Persistence
    #[cfg(feature = "database")]
    #[error("Database error")]
    StoreFailure(#[from] sea_orm::DbErr),

    /// Work failed and the rollback that followed failed too.
    #[error("{source} (rollback failed: {rollback})")]
    Rollback {
        source: Box<AppError>,
        rollback: String,
    },

    // Internal
    #[error("Internal server error")]
    Internal(String),
}

/// Error response body for HTTP
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    code: u16,
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
}

impl AppError {
    /// Error with any rollback wrapper peeled off.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Rollback { source, .. } => source.root(),
            other => other,
        }
    }

    /// Get error code for client
    pub fn code(&self) -> &'static str {
        match self {
            AppError::EmailAlreadyExists => "EMAIL_ALREADY_EXISTS",
            AppError::InvalidEmailOrPassword => "INVALID_EMAIL_OR_PASSWORD",
            AppError::HashingFailure(_) => "HASHING_FAILURE",
            AppError::TokenNotFound => "TOKEN_NOT_FOUND",
            AppError::TokenRevoked => "TOKEN_REVOKED",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            #[cfg(feature = "jwt")]
            AppError::InvalidToken(_) => "INVALID_TOKEN",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::NotFound => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::ConfigInvalid(_) => "CONFIG_INVALID",
            AppError::Timeout => "TIMEOUT",
            #[cfg(feature = "database")]
            AppError::StoreFailure(_) => "STORE_FAILURE",
            AppError::Rollback { source, .. } => source.code(),
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::EmailAlreadyExists => StatusCode::CONFLICT,
            AppError::InvalidEmailOrPassword
            | AppError::TokenNotFound
            | AppError::TokenRevoked
            | AppError::TokenExpired
            | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            #[cfg(feature = "jwt")]
            AppError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Rollback { source, .. } => source.status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get user-facing message (hides internal details)
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),

            #[cfg(feature = "database")]
            AppError::StoreFailure(e) => {
                tracing::error!("Database error: {:?}", e);
                "A database error occurred".to_string()
            }
            #[cfg(feature = "jwt")]
            AppError::InvalidToken(e) => {
                tracing::debug!("JWT error: {:?}", e);
                "Invalid or expired token".to_string()
            }
            AppError::HashingFailure(msg) => {
                tracing::error!("Hashing error: {}", msg);
                "An internal error occurred".to_string()
            }
            AppError::ConfigInvalid(msg) => {
                tracing::error!("Configuration error: {}", msg);
                "An internal error occurred".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            AppError::Rollback { source, rollback } => {
                tracing::error!("Rollback failed: {}", rollback);
                source.user_message()
            }

            _ => self.to_string(),
        }
    }
}

// =============================================================================
// HTTP Response (Axum)
// =============================================================================

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            success: false,
            code: status.as_u16(),
            error: ErrorBody {
                kind: self.code().to_string(),
                message: self.user_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Domain Error Conversion
// =============================================================================

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Password(msg) => AppError::HashingFailure(msg),
            DomainError::InvalidParams(msg) => AppError::ConfigInvalid(msg),
        }
    }
}

/// Result type alias
pub type AppResult<T> = Result<T, AppError>;

/// Extension trait for Option -> AppError conversion
pub trait OptionExt<T> {
    fn ok_or_not_found(self) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self) -> AppResult<T> {
        self.ok_or(AppError::NotFound)
    }
}

/// Convenience constructors
impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        AppError::ConfigInvalid(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    /// Combine a work error with the failure of the rollback that followed it.
    pub fn rollback(source: AppError, rollback: impl std::fmt::Display) -> Self {
        AppError::Rollback {
            source: Box::new(source),
            rollback: rollback.to_string(),
        }
    }
}
