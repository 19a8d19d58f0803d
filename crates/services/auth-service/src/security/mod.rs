//! Credential hashing and token signing.

mod hasher;
mod issuer;

pub use hasher::{Argon2Hasher, CredentialHasher};
pub use issuer::{IssuedToken, JwtIssuer, TokenClaims, TokenIssuer};

#[cfg(any(test, feature = "test-utils"))]
pub use hasher::MockCredentialHasher;
#[cfg(any(test, feature = "test-utils"))]
pub use issuer::MockTokenIssuer;
