//! Domain-level errors.
//!
//! These errors represent failures inside value objects.
//! They are independent of infrastructure concerns (HTTP, database).

use thiserror::Error;

/// Domain-specific errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Password hashing failed
    #[error("Password error: {0}")]
    Password(String),

    /// Value object was built from invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

impl DomainError {
    /// Create a password error
    pub fn password(msg: impl Into<String>) -> Self {
        DomainError::Password(msg.into())
    }

    /// Create an invalid parameters error
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        DomainError::InvalidParams(msg.into())
    }
}

/// Result type alias for domain operations
pub type DomainResult<T> = Result<T, DomainError>;
