//! Domain-level constants.
//!
//! These constants define token lifetimes and wire identifiers shared by
//! the auth service and the gateway.

// =============================================================================
// Token lifetimes
// =============================================================================

/// Default access token lifetime in minutes
pub const DEFAULT_ACCESS_TOKEN_TTL_MINUTES: i64 = 30;

/// Default refresh token lifetime in days
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 7;

/// Default per-operation deadline in seconds
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Token identifiers
// =============================================================================

/// Issuer claim used when no application name is configured
pub const DEFAULT_APP_NAME: &str = "Auth Service";

/// `typ` claim carried by access tokens
pub const TOKEN_KIND_ACCESS: &str = "access";

/// `typ` claim carried by refresh tokens
pub const TOKEN_KIND_REFRESH: &str = "refresh";

/// Authorization header prefix for Bearer tokens
pub const BEARER_TOKEN_PREFIX: &str = "Bearer ";

/// Token type identifier returned to clients
pub const TOKEN_TYPE_BEARER: &str = "Bearer";
