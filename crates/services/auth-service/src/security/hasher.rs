//! Credential hasher - one-way password hashing and verification.

use argon2::Argon2;
use uuid::Uuid;

use common::{AppResult, HashingConfig};
use domain::Password;

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// Password hashing capability injected into the auth service.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait CredentialHasher: Send + Sync {
    /// Hash a plaintext password into a self-describing hash string.
    fn hash(&self, plaintext: &str) -> AppResult<String>;

    /// Check a plaintext password against a stored hash. Never errors.
    fn verify(&self, hashed: &str, plaintext: &str) -> bool;

    /// Hash at the configured cost that matches no password.
    ///
    /// Verified in place of a stored hash when an account does not exist,
    /// so an unknown email costs the same as a wrong password.
    fn dummy_hash(&self) -> String;
}

/// Argon2id hasher with configurable cost.
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl Argon2Hasher {
    /// Build a hasher from cost parameters.
    ///
    /// # Errors
    /// Returns `ConfigInvalid` if Argon2 rejects the parameters.
    pub fn new(config: &HashingConfig) -> AppResult<Self> {
        let argon2 = Password::argon2(config.memory_kib, config.iterations, config.parallelism)?;
        let dummy_hash = Password::hash_with(&argon2, &Uuid::new_v4().to_string())?.into_string();
        Ok(Self { argon2, dummy_hash })
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> AppResult<String> {
        Ok(Password::hash_with(&self.argon2, plaintext)?.into_string())
    }

    fn verify(&self, hashed: &str, plaintext: &str) -> bool {
        Password::from_hash(hashed).verify(plaintext)
    }

    fn dummy_hash(&self) -> String {
        self.dummy_hash.clone()
    }
}
