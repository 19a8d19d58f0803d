//! Token issuer - signed, time-bounded access and refresh tokens.
//!
//! Access and refresh tokens are HS256 JWTs signed with distinct keys and
//! carrying a `typ` claim, so one can never be accepted in place of the
//! other. Verification is purely cryptographic: signature, issuer, expiry.
//! Whether a refresh token was revoked is a store question.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{AppError, AppResult, JwtConfig};
use domain::{User, TOKEN_KIND_ACCESS, TOKEN_KIND_REFRESH};

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// JWT claims payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: Uuid,
    pub email: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub sub: String,
    /// Unique per token, so two tokens minted in the same second differ
    pub jti: Uuid,
    pub typ: String,
}

/// A freshly signed token and the instants it is valid between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    /// Lifetime in whole seconds.
    pub fn lifetime_secs(&self) -> i64 {
        (self.expires_at - self.issued_at).num_seconds()
    }
}

/// Token issuing capability injected into the auth service.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait TokenIssuer: Send + Sync {
    /// Sign a short-lived access token for the user.
    fn issue_access_token(&self, user: &User) -> AppResult<IssuedToken>;

    /// Sign a long-lived refresh token for the user.
    fn issue_refresh_token(&self, user: &User) -> AppResult<IssuedToken>;

    /// Verify an access token's signature and expiry.
    fn verify_access_token(&self, token: &str) -> AppResult<TokenClaims>;

    /// Verify a refresh token's signature and expiry. Does not consult the store.
    fn verify_refresh_token(&self, token: &str) -> AppResult<TokenClaims>;
}

/// Signing material for one token kind.
struct SigningKey {
    kind: &'static str,
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

/// HS256 JWT issuer.
pub struct JwtIssuer {
    issuer: String,
    access: SigningKey,
    refresh: SigningKey,
    validation: Validation,
}

impl JwtIssuer {
    /// Create an issuer from validated JWT settings.
    ///
    /// # Errors
    /// Returns `ConfigInvalid` if either key is empty, the keys are equal or a
    /// lifetime is not positive or too large to put an expiry on.
    pub fn new(config: &JwtConfig) -> AppResult<Self> {
        config.validate()?;
        let access_ttl = token_lifetime(
            Duration::try_minutes(config.access_ttl_minutes),
            "access token lifetime",
        )?;
        let refresh_ttl = token_lifetime(
            Duration::try_days(config.refresh_ttl_days),
            "refresh token lifetime",
        )?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Ok(Self {
            issuer: config.issuer.clone(),
            access: SigningKey {
                kind: TOKEN_KIND_ACCESS,
                encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
                decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
                ttl: access_ttl,
            },
            refresh: SigningKey {
                kind: TOKEN_KIND_REFRESH,
                encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
                decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
                ttl: refresh_ttl,
            },
            validation,
        })
    }

    fn issue(&self, key: &SigningKey, user: &User) -> AppResult<IssuedToken> {
        let issued_at = Utc::now();
        let expires_at = issued_at
            .checked_add_signed(key.ttl)
            .ok_or_else(|| AppError::internal("token expiry out of range"))?;

        let claims = TokenClaims {
            user_id: user.id,
            email: user.email.clone(),
            iss: self.issuer.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            sub: user.id.to_string(),
            jti: Uuid::new_v4(),
            typ: key.kind.to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &key.encoding)?;

        Ok(IssuedToken {
            token,
            issued_at,
            expires_at,
        })
    }

    fn verify(&self, key: &SigningKey, token: &str) -> AppResult<TokenClaims> {
        let claims = decode::<TokenClaims>(token, &key.decoding, &self.validation)?.claims;

        if claims.typ != key.kind || claims.sub != claims.user_id.to_string() {
            return Err(AppError::InvalidToken(ErrorKind::InvalidToken.into()));
        }

        Ok(claims)
    }
}

/// A lifetime is usable if an expiry computed from now still fits a timestamp.
fn token_lifetime(ttl: Option<Duration>, what: &str) -> AppResult<Duration> {
    ttl.filter(|ttl| Utc::now().checked_add_signed(*ttl).is_some())
        .ok_or_else(|| AppError::config(format!("{} is out of range", what)))
}

impl TokenIssuer for JwtIssuer {
    fn issue_access_token(&self, user: &User) -> AppResult<IssuedToken> {
        self.issue(&self.access, user)
    }

    fn issue_refresh_token(&self, user: &User) -> AppResult<IssuedToken> {
        self.issue(&self.refresh, user)
    }

    fn verify_access_token(&self, token: &str) -> AppResult<TokenClaims> {
        self.verify(&self.access, token)
    }

    fn verify_refresh_token(&self, token: &str) -> AppResult<TokenClaims> {
        self.verify(&self.refresh, token)
    }
}
