//! Token store - durable users and refresh tokens.
//!
//! The read side runs on the pooled connection. Mutations only exist on the
//! transaction-bound side, so every write happens inside a unit of work.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, DbErr, EntityTrait, QueryFilter, Set, SqlErr,
};
use uuid::Uuid;

use super::entities::refresh_token::{self, Entity as RefreshTokenEntity};
use super::entities::user::{self, Entity as UserEntity};
use common::{AppError, AppResult, OptionExt};
use domain::{NewRefreshToken, RefreshToken, RefreshTokenStatus, User};

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// Read operations on users and refresh tokens.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Check whether an account with this exact email exists
    async fn email_exists(&self, email: &str) -> AppResult<bool>;

    /// Find user by email, `NotFound` if absent
    async fn find_by_email(&self, email: &str) -> AppResult<User>;

    /// Find user by ID, `NotFound` if absent
    async fn find_by_id(&self, id: Uuid) -> AppResult<User>;

    /// Check a refresh token: not found, then revoked, then expired.
    ///
    /// Returns the stored record when the token is usable.
    async fn validate_refresh_token(&self, token: &str) -> AppResult<RefreshToken>;
}

/// Mutations, bound to the transaction they were obtained from.
#[async_trait]
pub trait TokenStoreTx: Send + Sync {
    /// Insert a user; the store assigns id and timestamps
    async fn insert_user(&self, email: &str, password_hash: &str) -> AppResult<User>;

    /// Persist a newly issued refresh token (not revoked)
    async fn insert_refresh_token(&self, token: NewRefreshToken) -> AppResult<()>;

    /// Mark a refresh token revoked.
    ///
    /// Fails with `TokenNotFound` if no such token exists and `TokenRevoked`
    /// if it was already revoked.
    async fn revoke_refresh_token(&self, token: &str) -> AppResult<()>;
}

/// Map a stored record to its validity at `now`.
pub(crate) fn check_refresh_token(record: RefreshToken, now: DateTime<Utc>) -> AppResult<RefreshToken> {
    match record.status_at(now) {
        RefreshTokenStatus::Active => Ok(record),
        RefreshTokenStatus::Revoked => Err(AppError::TokenRevoked),
        RefreshTokenStatus::Expired => Err(AppError::TokenExpired),
    }
}

/// Queries shared by the pooled and transactional stores.
pub(crate) mod queries {
    use super::*;

    pub async fn email_exists<C: ConnectionTrait>(db: &C, email: &str) -> AppResult<bool> {
        let found = UserEntity::find()
            .filter(user::Column::Email.eq(email))
            .one(db)
            .await?;
        Ok(found.is_some())
    }

    pub async fn find_by_email<C: ConnectionTrait>(db: &C, email: &str) -> AppResult<User> {
        UserEntity::find()
            .filter(user::Column::Email.eq(email))
            .one(db)
            .await?
            .map(User::from)
            .ok_or_not_found()
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> AppResult<User> {
        UserEntity::find_by_id(id)
            .one(db)
            .await?
            .map(User::from)
            .ok_or_not_found()
    }

    pub async fn find_refresh_token<C: ConnectionTrait>(
        db: &C,
        token: &str,
    ) -> AppResult<Option<RefreshToken>> {
        let found = RefreshTokenEntity::find()
            .filter(refresh_token::Column::Token.eq(token))
            .one(db)
            .await?;
        Ok(found.map(RefreshToken::from))
    }

    pub async fn insert_user<C: ConnectionTrait>(
        db: &C,
        email: &str,
        password_hash: &str,
    ) -> AppResult<User> {
        let now = Utc::now();
        let active_model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            password: Set(password_hash.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // A concurrent registration can slip past the existence pre-check
        let model = active_model.insert(db).await.map_err(|e| {
            if is_unique_violation(&e) {
                AppError::EmailAlreadyExists
            } else {
                AppError::from(e)
            }
        })?;

        Ok(User::from(model))
    }

    pub async fn insert_refresh_token<C: ConnectionTrait>(
        db: &C,
        token: NewRefreshToken,
    ) -> AppResult<()> {
        let active_model = refresh_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(token.user_id),
            token: Set(token.token),
            expires_at: Set(token.expires_at),
            revoked: Set(false),
            created_at: Set(Utc::now()),
        };

        active_model.insert(db).await?;
        Ok(())
    }

    pub async fn revoke_refresh_token<C: ConnectionTrait>(db: &C, token: &str) -> AppResult<()> {
        // Conditional update: the row lock it takes makes a concurrent
        // revocation of the same token wait, then match zero rows.
        let result = RefreshTokenEntity::update_many()
            .col_expr(refresh_token::Column::Revoked, Expr::value(true))
            .filter(refresh_token::Column::Token.eq(token))
            .filter(refresh_token::Column::Revoked.eq(false))
            .exec(db)
            .await?;

        if result.rows_affected > 0 {
            return Ok(());
        }

        match find_refresh_token(db, token).await? {
            Some(_) => Err(AppError::TokenRevoked),
            None => Err(AppError::TokenNotFound),
        }
    }

    fn is_unique_violation(err: &DbErr) -> bool {
        matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
    }
}

/// Pooled-connection implementation of [`TokenStore`].
pub struct SeaTokenStore {
    db: Arc<DatabaseConnection>,
}

impl SeaTokenStore {
    /// Create new store instance
    pub fn new(db: impl Into<Arc<DatabaseConnection>>) -> Self {
        Self { db: db.into() }
    }
}

#[async_trait]
impl TokenStore for SeaTokenStore {
    async fn email_exists(&self, email: &str) -> AppResult<bool> {
        queries::email_exists(self.db.as_ref(), email).await
    }

    async fn find_by_email(&self, email: &str) -> AppResult<User> {
        queries::find_by_email(self.db.as_ref(), email).await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<User> {
        queries::find_by_id(self.db.as_ref(), id).await
    }

    async fn validate_refresh_token(&self, token: &str) -> AppResult<RefreshToken> {
        let record = queries::find_refresh_token(self.db.as_ref(), token)
            .await?
            .ok_or(AppError::TokenNotFound)?;
        check_refresh_token(record, Utc::now())
    }
}

/// Transaction-bound implementation of [`TokenStoreTx`].
///
/// Borrows the transaction so it cannot outlive it.
pub struct TxTokenStore<'a> {
    txn: &'a DatabaseTransaction,
}

impl<'a> TxTokenStore<'a> {
    /// Create new transaction-aware store
    pub fn new(txn: &'a DatabaseTransaction) -> Self {
        Self { txn }
    }
}

#[async_trait]
impl TokenStoreTx for TxTokenStore<'_> {
    async fn insert_user(&self, email: &str, password_hash: &str) -> AppResult<User> {
        queries::insert_user(self.txn, email, password_hash).await
    }

    async fn insert_refresh_token(&self, token: NewRefreshToken) -> AppResult<()> {
        queries::insert_refresh_token(self.txn, token).await
    }

    async fn revoke_refresh_token(&self, token: &str) -> AppResult<()> {
        queries::revoke_refresh_token(self.txn, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn token_model(revoked: bool, expires_at: DateTime<Utc>) -> refresh_token::Model {
        refresh_token::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token: "refresh".to_string(),
            expires_at,
            revoked,
            created_at: Utc::now(),
        }
    }

    fn user_model() -> user::Model {
        let now = Utc::now();
        user::Model {
            id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            password: "$argon2id$hash".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_validate_missing_token() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<refresh_token::Model>::new()])
            .into_connection();

        let result = SeaTokenStore::new(db).validate_refresh_token("refresh").await;
        assert!(matches!(result, Err(AppError::TokenNotFound)));
    }

    #[tokio::test]
    async fn test_validate_revoked_before_expired() {
        let expired_and_revoked = token_model(true, Utc::now() - Duration::days(1));
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![expired_and_revoked]])
            .into_connection();

        let result = SeaTokenStore::new(db).validate_refresh_token("refresh").await;
        assert!(matches!(result, Err(AppError::TokenRevoked)));
    }

    #[tokio::test]
    async fn test_validate_expired() {
        let expired = token_model(false, Utc::now() - Duration::seconds(5));
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![expired]])
            .into_connection();

        let result = SeaTokenStore::new(db).validate_refresh_token("refresh").await;
        assert!(matches!(result, Err(AppError::TokenExpired)));
    }

    #[tokio::test]
    async fn test_validate_active_returns_record() {
        let active = token_model(false, Utc::now() + Duration::days(7));
        let owner = active.user_id;
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![active]])
            .into_connection();

        let record = SeaTokenStore::new(db)
            .validate_refresh_token("refresh")
            .await
            .unwrap();
        assert_eq!(record.user_id, owner);
        assert!(!record.revoked);
    }

    #[tokio::test]
    async fn test_find_by_email_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user::Model>::new()])
            .into_connection();

        let result = SeaTokenStore::new(db).find_by_email("nobody@x.com").await;
        assert!(matches!(result, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_find_by_id_maps_password_column() {
        let model = user_model();
        let id = model.id;
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .into_connection();

        let user = SeaTokenStore::new(db).find_by_id(id).await.unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.password_hash, "$argon2id$hash");
    }

    #[tokio::test]
    async fn test_revoke_updates_one_row() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        tokio_test::assert_ok!(queries::revoke_refresh_token(&db, "refresh").await);
    }

    #[tokio::test]
    async fn test_revoke_already_revoked() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .append_query_results([vec![token_model(true, Utc::now() + Duration::days(1))]])
            .into_connection();

        let result = queries::revoke_refresh_token(&db, "refresh").await;
        assert!(matches!(result, Err(AppError::TokenRevoked)));
    }

    #[tokio::test]
    async fn test_revoke_unknown_token() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .append_query_results([Vec::<refresh_token::Model>::new()])
            .into_connection();

        let result = queries::revoke_refresh_token(&db, "missing").await;
        assert!(matches!(result, Err(AppError::TokenNotFound)));
    }

    #[tokio::test]
    async fn test_insert_user_returns_store_assigned_fields() {
        let model = user_model();
        let id = model.id;
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model]])
            .into_connection();

        let user = queries::insert_user(&db, "a@x.com", "$argon2id$hash")
            .await
            .unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.email, "a@x.com");
    }
}
