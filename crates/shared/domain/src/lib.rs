//! Domain layer - Core business entities and value objects.
//!
//! This crate contains pure domain logic with no infrastructure dependencies.
//! Users, refresh token records and password hashes live here and are shared
//! by the auth service and the HTTP gateway.

pub mod constants;
pub mod error;
pub mod password;
pub mod token;
pub mod user;

pub use constants::*;
pub use error::{DomainError, DomainResult};
pub use password::Password;
pub use token::{NewRefreshToken, RefreshToken, RefreshTokenStatus, TokenPair};
pub use user::{User, UserResponse};
