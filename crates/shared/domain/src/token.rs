//! Refresh token records and issued token pairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Validity of a stored refresh token at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenStatus {
    Active,
    Revoked,
    Expired,
}

/// Persisted refresh token.
///
/// Rows are never deleted: `revoked` only ever moves from false to true and
/// expired rows stay behind as an audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Check if the token has been revoked
    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Check if the token is past its expiry at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Revocation wins over expiry.
    pub fn status_at(&self, now: DateTime<Utc>) -> RefreshTokenStatus {
        if self.is_revoked() {
            RefreshTokenStatus::Revoked
        } else if self.is_expired_at(now) {
            RefreshTokenStatus::Expired
        } else {
            RefreshTokenStatus::Active
        }
    }
}

/// Refresh token about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRefreshToken {
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Access/refresh pair handed back by register, login and rotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TokenPair {
    /// Short-lived signed access token
    pub access_token: String,
    /// Long-lived, store-tracked refresh token
    pub refresh_token: String,
    /// Token type (always "Bearer")
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}
