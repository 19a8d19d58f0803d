//! Auth Service Library
//!
//! Credential and session lifecycle: password hashing, signed access and
//! refresh tokens, and a refresh-token store whose mutations run inside
//! transactions. Transports (the HTTP gateway) call [`service::AuthService`].

pub mod config;
pub mod infra;
pub mod repository;
pub mod security;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AuthServiceConfig;
use crate::infra::Persistence;
use crate::security::{Argon2Hasher, JwtIssuer};
use crate::service::Authenticator;
use common::AppResult;

/// Wire the production collaborators around an open connection.
///
/// # Errors
/// Returns `ConfigInvalid` if the signing keys or hashing cost are rejected.
pub fn build_authenticator(
    db: DatabaseConnection,
    config: &AuthServiceConfig,
) -> AppResult<Authenticator<Persistence>> {
    let issuer = JwtIssuer::new(&config.jwt)?;
    let hasher = Argon2Hasher::new(&config.hashing)?;

    Ok(Authenticator::with_config(
        Arc::new(Persistence::new(db)),
        Arc::new(issuer),
        Arc::new(hasher),
        config,
    ))
}
