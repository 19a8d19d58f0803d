//! Authentication service - registration, login, refresh rotation, logout.
//!
//! Every operation runs under the configured deadline. Store mutations that
//! belong together (user row and its first refresh token, revoking the old
//! refresh token and storing its successor) share one transaction.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use uuid::Uuid;

use crate::config::AuthServiceConfig;
use crate::infra::UnitOfWork;
use crate::repository::TokenStoreTx;
use crate::security::{CredentialHasher, TokenClaims, TokenIssuer};
use common::{AppError, AppResult};
use domain::{NewRefreshToken, TokenPair, User, TOKEN_TYPE_BEARER};

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// Authentication service trait for dependency injection.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Create an account and open its first session
    async fn register(&self, email: String, password: String) -> AppResult<TokenPair>;

    /// Authenticate credentials and open a new session
    async fn login(&self, email: String, password: String) -> AppResult<TokenPair>;

    /// Rotate a refresh token owned by `user_id`: the presented token is
    /// revoked and a new pair is issued.
    async fn refresh_token(&self, user_id: Uuid, token: String) -> AppResult<TokenPair>;

    /// Revoke a refresh token
    async fn logout(&self, token: String) -> AppResult<()>;

    /// Current account data
    async fn get_profile(&self, user_id: Uuid) -> AppResult<User>;

    /// Verify an access token presented to the transport
    fn verify_access_token(&self, token: &str) -> AppResult<TokenClaims>;

    /// Check that the store is reachable
    async fn health(&self) -> AppResult<()>;
}

/// Concrete implementation of AuthService.
pub struct Authenticator<U: UnitOfWork> {
    uow: Arc<U>,
    issuer: Arc<dyn TokenIssuer>,
    hasher: Arc<dyn CredentialHasher>,
    operation_timeout: Duration,
}

impl<U: UnitOfWork> Authenticator<U> {
    /// Create new auth service instance
    pub fn new(
        uow: Arc<U>,
        issuer: Arc<dyn TokenIssuer>,
        hasher: Arc<dyn CredentialHasher>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            uow,
            issuer,
            hasher,
            operation_timeout,
        }
    }

    /// Create from service configuration
    pub fn with_config(
        uow: Arc<U>,
        issuer: Arc<dyn TokenIssuer>,
        hasher: Arc<dyn CredentialHasher>,
        config: &AuthServiceConfig,
    ) -> Self {
        Self::new(uow, issuer, hasher, config.operation_timeout)
    }

    /// Run `work` under the operation deadline; the work is dropped on expiry.
    async fn bounded<T, Fut>(&self, operation: &'static str, work: Fut) -> AppResult<T>
    where
        Fut: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, timeout = ?self.operation_timeout, "Auth operation timed out");
                Err(AppError::Timeout)
            }
        }
    }

    async fn hash_password(&self, password: String) -> AppResult<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AppError::internal(format!("hashing task failed: {}", e)))?
    }

    async fn verify_password(&self, hashed: String, password: String) -> AppResult<bool> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&hashed, &password))
            .await
            .map_err(|e| AppError::internal(format!("verification task failed: {}", e)))
    }
}

/// Issue an access/refresh pair and record the refresh token in `tokens`.
async fn issue_pair(
    issuer: &dyn TokenIssuer,
    tokens: &dyn TokenStoreTx,
    user: &User,
) -> AppResult<TokenPair> {
    let access = issuer.issue_access_token(user)?;
    let refresh = issuer.issue_refresh_token(user)?;

    tokens
        .insert_refresh_token(NewRefreshToken {
            user_id: user.id,
            token: refresh.token.clone(),
            expires_at: refresh.expires_at,
        })
        .await?;

    let expires_in = access.lifetime_secs();
    Ok(TokenPair {
        access_token: access.token,
        refresh_token: refresh.token,
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in,
    })
}

#[async_trait]
impl<U: UnitOfWork> AuthService for Authenticator<U> {
    #[tracing::instrument(skip(self, password))]
    async fn register(&self, email: String, password: String) -> AppResult<TokenPair> {
        self.bounded("register", async move {
            if self.uow.store().email_exists(&email).await? {
                return Err(AppError::EmailAlreadyExists);
            }

            let password_hash = self.hash_password(password).await?;

            let issuer = self.issuer.clone();
            let (user_id, pair) = self
                .uow
                .transaction(move |ctx| {
                    Box::pin(async move {
                        let user = ctx.tokens().insert_user(&email, &password_hash).await?;
                        let pair = issue_pair(issuer.as_ref(), ctx.tokens(), &user).await?;
                        Ok((user.id, pair))
                    })
                })
                .await?;

            tracing::info!(user_id = %user_id, "User registered");
            Ok(pair)
        })
        .await
    }

    #[tracing::instrument(skip(self, password))]
    async fn login(&self, email: String, password: String) -> AppResult<TokenPair> {
        self.bounded("login", async move {
            let found = match self.uow.store().find_by_email(&email).await {
                Ok(user) => Some(user),
                Err(AppError::NotFound) => None,
                Err(e) => return Err(e),
            };

            // Unknown emails still pay for a verification so both failures
            // take the same time.
            let stored_hash = found
                .as_ref()
                .map_or_else(|| self.hasher.dummy_hash(), |u| u.password_hash.clone());
            let password_valid = self.verify_password(stored_hash, password).await?;

            let user = match found {
                Some(user) if password_valid => user,
                _ => {
                    tracing::info!("Login rejected");
                    return Err(AppError::InvalidEmailOrPassword);
                }
            };

            let user_id = user.id;
            let issuer = self.issuer.clone();
            let pair = self
                .uow
                .transaction(move |ctx| {
                    Box::pin(async move { issue_pair(issuer.as_ref(), ctx.tokens(), &user).await })
                })
                .await?;

            tracing::info!(user_id = %user_id, "User logged in");
            Ok(pair)
        })
        .await
    }

    #[tracing::instrument(skip(self, token))]
    async fn refresh_token(&self, user_id: Uuid, token: String) -> AppResult<TokenPair> {
        self.bounded("refresh_token", async move {
            let record = self.uow.store().validate_refresh_token(&token).await?;

            // Someone else's token is indistinguishable from a missing one
            if record.user_id != user_id {
                return Err(AppError::TokenNotFound);
            }

            let claims = self.issuer.verify_refresh_token(&token)?;
            if claims.user_id != user_id {
                return Err(AppError::InvalidToken(ErrorKind::InvalidToken.into()));
            }

            let user = self.uow.store().find_by_id(user_id).await?;

            let issuer = self.issuer.clone();
            let pair = self
                .uow
                .transaction(move |ctx| {
                    Box::pin(async move {
                        // Loses to a concurrent rotation of the same token
                        ctx.tokens().revoke_refresh_token(&token).await?;
                        issue_pair(issuer.as_ref(), ctx.tokens(), &user).await
                    })
                })
                .await?;

            tracing::info!(user_id = %user_id, "Refresh token rotated");
            Ok(pair)
        })
        .await
    }

    #[tracing::instrument(skip(self, token))]
    async fn logout(&self, token: String) -> AppResult<()> {
        self.bounded("logout", async move {
            self.uow
                .transaction(move |ctx| {
                    Box::pin(async move { ctx.tokens().revoke_refresh_token(&token).await })
                })
                .await?;

            tracing::info!("Refresh token revoked");
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn get_profile(&self, user_id: Uuid) -> AppResult<User> {
        self.bounded("get_profile", self.uow.store().find_by_id(user_id))
            .await
    }

    fn verify_access_token(&self, token: &str) -> AppResult<TokenClaims> {
        self.issuer.verify_access_token(token)
    }

    async fn health(&self) -> AppResult<()> {
        self.bounded("health", self.uow.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::unit_of_work::{TransactionContext, TxFuture};
    use crate::repository::{MockTokenStore, TokenStore};
    use crate::security::{Argon2Hasher, JwtIssuer, MockCredentialHasher, MockTokenIssuer};
    use crate::testing::MemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use common::{HashingConfig, JwtConfig};
    use domain::RefreshToken;

    fn jwt_config() -> JwtConfig {
        JwtConfig {
            issuer: "test-app".to_string(),
            access_secret: "access-secret-for-tests".to_string(),
            refresh_secret: "refresh-secret-for-tests".to_string(),
            access_ttl_minutes: 30,
            refresh_ttl_days: 7,
        }
    }

    fn cheap_hasher() -> Arc<dyn CredentialHasher> {
        Arc::new(
            Argon2Hasher::new(&HashingConfig {
                memory_kib: 8,
                iterations: 1,
                parallelism: 1,
            })
            .unwrap(),
        )
    }

    fn service_with(
        store: &MemoryStore,
        issuer: Arc<dyn TokenIssuer>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Authenticator<MemoryStore> {
        Authenticator::new(
            Arc::new(store.clone()),
            issuer,
            hasher,
            Duration::from_secs(5),
        )
    }

    fn service(store: &MemoryStore) -> Authenticator<MemoryStore> {
        service_with(
            store,
            Arc::new(JwtIssuer::new(&jwt_config()).unwrap()),
            cheap_hasher(),
        )
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let store = MemoryStore::new();
        let auth = service(&store);

        let registered = auth
            .register("a@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap();
        let logged_in = auth
            .login("a@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap();

        assert_ne!(registered.refresh_token, logged_in.refresh_token);
        assert_eq!(logged_in.token_type, "Bearer");
        assert_eq!(logged_in.expires_in, 30 * 60);

        let claims = auth.verify_access_token(&logged_in.access_token).unwrap();
        let user = store.user("a@x.com").unwrap();
        assert_eq!(claims.user_id, user.id);
        assert_ne!(user.password_hash, "pw1");
        assert_eq!(store.refresh_tokens_for(user.id).len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_register() {
        let store = MemoryStore::new();
        let auth = service(&store);

        auth.register("a@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap();
        let result = auth
            .register("a@x.com".to_string(), "pw2".to_string())
            .await;

        assert!(matches!(result, Err(AppError::EmailAlreadyExists)));
        assert_eq!(store.user_count(), 1);
    }

    /// Reads that never see an existing account, as when a concurrent
    /// registration commits between the existence check and the insert.
    struct StaleReads {
        inner: MemoryStore,
    }

    #[async_trait]
    impl UnitOfWork for StaleReads {
        fn store(&self) -> Arc<dyn TokenStore> {
            let mut reads = MockTokenStore::new();
            reads.expect_email_exists().returning(|_| Ok(false));
            Arc::new(reads)
        }

        async fn transaction<F, T>(&self, f: F) -> AppResult<T>
        where
            F: for<'a> FnOnce(TransactionContext<'a>) -> TxFuture<'a, T> + Send,
            T: Send,
        {
            self.inner.transaction(f).await
        }

        async fn ping(&self) -> AppResult<()> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_register_race_is_a_conflict() {
        let store = MemoryStore::new();
        service(&store)
            .register("a@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap();

        let racing = Authenticator::new(
            Arc::new(StaleReads {
                inner: store.clone(),
            }),
            Arc::new(JwtIssuer::new(&jwt_config()).unwrap()),
            cheap_hasher(),
            Duration::from_secs(5),
        );
        let result = racing
            .register("a@x.com".to_string(), "pw2".to_string())
            .await;

        assert!(matches!(result, Err(AppError::EmailAlreadyExists)));
        assert_eq!(store.user_count(), 1);
        let user = store.user("a@x.com").unwrap();
        assert_eq!(store.refresh_tokens_for(user.id).len(), 1);
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let store = MemoryStore::new();
        let auth = service(&store);
        auth.register("a@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap();

        let wrong_password = auth
            .login("a@x.com".to_string(), "nope".to_string())
            .await
            .unwrap_err();
        let unknown_email = auth
            .login("b@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, AppError::InvalidEmailOrPassword));
        assert!(matches!(unknown_email, AppError::InvalidEmailOrPassword));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
    }

    #[tokio::test]
    async fn test_unknown_email_still_verifies_dummy_hash() {
        let store = MemoryStore::new();
        let mut hasher = MockCredentialHasher::new();
        hasher
            .expect_dummy_hash()
            .times(1)
            .returning(|| "dummy-hash".to_string());
        hasher
            .expect_verify()
            .withf(|hashed, _| hashed.to_string() == "dummy-hash")
            .times(1)
            .returning(|_, _| false);

        let auth = service_with(
            &store,
            Arc::new(JwtIssuer::new(&jwt_config()).unwrap()),
            Arc::new(hasher),
        );

        let result = auth.login("b@x.com".to_string(), "pw1".to_string()).await;
        assert!(matches!(result, Err(AppError::InvalidEmailOrPassword)));
    }

    #[tokio::test]
    async fn test_rotation() {
        let store = MemoryStore::new();
        let auth = service(&store);
        let first = auth
            .register("a@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap();
        let user = store.user("a@x.com").unwrap();

        let second = auth
            .refresh_token(user.id, first.refresh_token.clone())
            .await
            .unwrap();

        assert_ne!(second.refresh_token, first.refresh_token);
        assert!(store.refresh_token(&first.refresh_token).unwrap().revoked);
        assert!(!store.refresh_token(&second.refresh_token).unwrap().revoked);

        let replay = auth.refresh_token(user.id, first.refresh_token).await;
        assert!(matches!(replay, Err(AppError::TokenRevoked)));

        assert!(auth.refresh_token(user.id, second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_rotation_has_one_winner() {
        let store = MemoryStore::new();
        let auth = Arc::new(service(&store));
        let pair = auth
            .register("a@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap();
        let user_id = store.user("a@x.com").unwrap().id;

        let a = tokio::spawn({
            let auth = auth.clone();
            let token = pair.refresh_token.clone();
            async move { auth.refresh_token(user_id, token).await }
        });
        let b = tokio::spawn({
            let auth = auth.clone();
            let token = pair.refresh_token.clone();
            async move { auth.refresh_token(user_id, token).await }
        });

        let results = [a.await.unwrap(), b.await.unwrap()];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let revoked = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::TokenRevoked)))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(revoked, 1);
        // the first token plus exactly one successor
        assert_eq!(store.refresh_tokens_for(user_id).len(), 2);
    }

    #[tokio::test]
    async fn test_logout_then_refresh() {
        let store = MemoryStore::new();
        let auth = service(&store);
        let pair = auth
            .register("a@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap();
        let user_id = store.user("a@x.com").unwrap().id;

        auth.logout(pair.refresh_token.clone()).await.unwrap();

        let result = auth.refresh_token(user_id, pair.refresh_token.clone()).await;
        assert!(matches!(result, Err(AppError::TokenRevoked)));

        let again = auth.logout(pair.refresh_token).await;
        assert!(matches!(again, Err(AppError::TokenRevoked)));
    }

    #[tokio::test]
    async fn test_logout_unknown_token() {
        let store = MemoryStore::new();
        let auth = service(&store);

        let result = auth.logout("never-issued".to_string()).await;
        assert!(matches!(result, Err(AppError::TokenNotFound)));
    }

    #[tokio::test]
    async fn test_expired_refresh_token() {
        let store = MemoryStore::new();
        let auth = service(&store);
        let pair = auth
            .register("a@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap();
        let record = store.refresh_token(&pair.refresh_token).unwrap();
        let user_id = record.user_id;

        store.put_refresh_token(RefreshToken {
            expires_at: Utc::now() - ChronoDuration::seconds(1),
            ..record
        });

        let result = auth.refresh_token(user_id, pair.refresh_token).await;
        assert!(matches!(result, Err(AppError::TokenExpired)));
    }

    #[tokio::test]
    async fn test_refresh_with_another_users_token() {
        let store = MemoryStore::new();
        let auth = service(&store);
        let pair = auth
            .register("a@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap();
        auth.register("b@x.com".to_string(), "pw2".to_string())
            .await
            .unwrap();
        let other = store.user("b@x.com").unwrap();

        let result = auth.refresh_token(other.id, pair.refresh_token.clone()).await;

        assert!(matches!(result, Err(AppError::TokenNotFound)));
        assert!(!store.refresh_token(&pair.refresh_token).unwrap().revoked);
    }

    #[tokio::test]
    async fn test_access_token_is_not_a_refresh_token() {
        let store = MemoryStore::new();
        let auth = service(&store);
        let pair = auth
            .register("a@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap();

        assert!(auth.verify_access_token(&pair.refresh_token).is_err());

        let user_id = store.user("a@x.com").unwrap().id;
        let result = auth.refresh_token(user_id, pair.access_token).await;
        assert!(matches!(result, Err(AppError::TokenNotFound)));
    }

    #[tokio::test]
    async fn test_register_rolls_back_when_issuing_fails() {
        let store = MemoryStore::new();
        let real = JwtIssuer::new(&jwt_config()).unwrap();
        let access = real.issue_access_token(&store_user()).unwrap();

        let mut issuer = MockTokenIssuer::new();
        issuer
            .expect_issue_access_token()
            .returning(move |_| Ok(access.clone()));
        issuer
            .expect_issue_refresh_token()
            .returning(|_| Err(AppError::internal("signing failed")));

        let auth = service_with(&store, Arc::new(issuer), cheap_hasher());
        let result = auth
            .register("a@x.com".to_string(), "pw1".to_string())
            .await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn test_register_panic_leaves_no_user() {
        let store = MemoryStore::new();
        let mut issuer = MockTokenIssuer::new();
        issuer
            .expect_issue_access_token()
            .returning(|_| panic!("issuer exploded"));

        let auth = Arc::new(service_with(&store, Arc::new(issuer), cheap_hasher()));
        let joined = tokio::spawn(async move {
            auth.register("a@x.com".to_string(), "pw1".to_string())
                .await
        })
        .await;

        assert!(joined.unwrap_err().is_panic());
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn test_operation_timeout() {
        let store = MemoryStore::new();
        let mut hasher = MockCredentialHasher::new();
        hasher.expect_hash().returning(|_| {
            std::thread::sleep(std::time::Duration::from_millis(300));
            Ok("slow-hash".to_string())
        });

        let auth = Authenticator::new(
            Arc::new(store.clone()),
            Arc::new(JwtIssuer::new(&jwt_config()).unwrap()),
            Arc::new(hasher),
            Duration::from_millis(50),
        );

        let result = auth
            .register("a@x.com".to_string(), "pw1".to_string())
            .await;
        assert!(matches!(result, Err(AppError::Timeout)));
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn test_get_profile() {
        let store = MemoryStore::new();
        let auth = service(&store);
        auth.register("a@x.com".to_string(), "pw1".to_string())
            .await
            .unwrap();
        let user_id = store.user("a@x.com").unwrap().id;

        let profile = auth.get_profile(user_id).await.unwrap();
        assert_eq!(profile.email, "a@x.com");

        let missing = auth.get_profile(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_health_reflects_store() {
        let store = MemoryStore::new();
        let auth = service(&store);

        assert!(auth.health().await.is_ok());
        store.set_unavailable(true);
        assert!(auth.health().await.is_err());
    }

    fn store_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            password_hash: "hash".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
