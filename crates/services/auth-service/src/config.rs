//! Auth service configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use common::{AppError, AppResult, DatabaseConfig, HashingConfig, JwtConfig};
use domain::{
    DEFAULT_ACCESS_TOKEN_TTL_MINUTES, DEFAULT_APP_NAME, DEFAULT_OPERATION_TIMEOUT_SECS,
    DEFAULT_REFRESH_TOKEN_TTL_DAYS,
};

/// Auth service configuration.
#[derive(Debug, Clone)]
pub struct AuthServiceConfig {
    /// Store connection settings
    pub database: DatabaseConfig,
    /// Signing keys, issuer and token lifetimes
    pub jwt: JwtConfig,
    /// Argon2 cost
    pub hashing: HashingConfig,
    /// Deadline applied to every auth operation
    pub operation_timeout: Duration,
}

impl AuthServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns `ConfigInvalid` if a numeric variable does not parse or the
    /// resulting configuration fails [`AuthServiceConfig::validate`].
    pub fn from_env() -> AppResult<Self> {
        let database = DatabaseConfig {
            url: env::var("AUTH_SERVICE_DATABASE_URL")
                .or_else(|_| env::var("DATABASE_URL"))
                .unwrap_or_else(|_| DatabaseConfig::default().url),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(DatabaseConfig::default().max_connections),
            min_connections: parse_var("DATABASE_MIN_CONNECTIONS")?
                .unwrap_or(DatabaseConfig::default().min_connections),
        };

        let jwt = JwtConfig {
            issuer: env::var("JWT_APP_NAME").unwrap_or_else(|_| DEFAULT_APP_NAME.to_string()),
            access_secret: env::var("JWT_SECRET_KEY")
                .or_else(|_| env::var("JWT_SECRET"))
                .unwrap_or_default(),
            refresh_secret: env::var("JWT_REFRESH_KEY").unwrap_or_default(),
            access_ttl_minutes: parse_var("JWT_ACCESS_TTL_MINUTES")?
                .unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_MINUTES),
            refresh_ttl_days: parse_var("JWT_REFRESH_TTL_DAYS")?
                .unwrap_or(DEFAULT_REFRESH_TOKEN_TTL_DAYS),
        };

        let defaults = HashingConfig::default();
        let hashing = HashingConfig {
            memory_kib: parse_var("HASH_MEMORY_KIB")?.unwrap_or(defaults.memory_kib),
            iterations: parse_var("HASH_ITERATIONS")?.unwrap_or(defaults.iterations),
            parallelism: parse_var("HASH_PARALLELISM")?.unwrap_or(defaults.parallelism),
        };

        let operation_timeout = Duration::from_secs(
            parse_var("AUTH_OPERATION_TIMEOUT_SECS")?.unwrap_or(DEFAULT_OPERATION_TIMEOUT_SECS),
        );

        let config = Self {
            database,
            jwt,
            hashing,
            operation_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate every collaborator setting before the service is built.
    pub fn validate(&self) -> AppResult<()> {
        self.database.validate()?;
        self.jwt.validate()?;
        if self.operation_timeout.is_zero() {
            return Err(AppError::config("operation timeout must be positive"));
        }
        Ok(())
    }
}

impl Default for AuthServiceConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            jwt: JwtConfig::default(),
            hashing: HashingConfig::default(),
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
        }
    }
}

/// Read and parse an optional environment variable.
fn parse_var<T: FromStr>(key: &str) -> AppResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::config(format!("{} is not a valid value", key))),
        Err(_) => Ok(None),
    }
}
