//! Unit of Work - atomic groups of store mutations.
//!
//! A transaction commits when its work returns `Ok`, rolls back when it
//! returns `Err`, and rolls back then re-raises when it panics. Dropping
//! the returned future before completion (timeout, caller gone) drops the
//! underlying transaction, which rolls it back.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use sea_orm::{
    AccessMode, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr, IsolationLevel,
    Statement, TransactionTrait,
};

use crate::repository::{SeaTokenStore, TokenStore, TokenStoreTx, TxTokenStore};
use common::{AppError, AppResult};

/// Future returned by transactional work, borrowing the context for `'a`.
pub type TxFuture<'a, T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send + 'a>>;

/// Unit of Work trait for dependency injection.
///
/// Not object safe because of the generic `transaction`; services are
/// generic over it instead.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Read-side store on the shared connection
    fn store(&self) -> Arc<dyn TokenStore>;

    /// Run `f` inside a transaction.
    ///
    /// Uses ReadCommitted isolation. Revocation relies on row locks taken by
    /// its conditional update rather than on a stricter level.
    async fn transaction<F, T>(&self, f: F) -> AppResult<T>
    where
        F: for<'a> FnOnce(TransactionContext<'a>) -> TxFuture<'a, T> + Send,
        T: Send;

    /// Check store connectivity
    async fn ping(&self) -> AppResult<()>;
}

/// Transaction-scoped access to store mutations.
///
/// Every operation performed through this context is part of the same
/// transaction; the borrow keeps it from escaping the closure.
pub struct TransactionContext<'a> {
    tokens: &'a (dyn TokenStoreTx + 'a),
}

impl<'a> TransactionContext<'a> {
    pub fn new(tokens: &'a (dyn TokenStoreTx + 'a)) -> Self {
        Self { tokens }
    }

    /// Token store bound to this transaction
    pub fn tokens(&self) -> &'a (dyn TokenStoreTx + 'a) {
        self.tokens
    }
}

/// SeaORM-backed UnitOfWork
pub struct Persistence {
    db: Arc<DatabaseConnection>,
    store: Arc<SeaTokenStore>,
}

impl Persistence {
    /// Create new UnitOfWork instance
    pub fn new(db: impl Into<Arc<DatabaseConnection>>) -> Self {
        let db = db.into();
        let store = Arc::new(SeaTokenStore::new(db.clone()));
        Self { db, store }
    }
}

/// Roll back after failed work, keeping the work's error as the cause.
async fn abort(txn: DatabaseTransaction, cause: AppError) -> AppError {
    settle(cause, txn.rollback().await)
}

fn settle(cause: AppError, rollback: Result<(), DbErr>) -> AppError {
    match rollback {
        Ok(()) => cause,
        Err(rollback_err) => {
            tracing::error!(error = %rollback_err, "Transaction rollback failed");
            AppError::rollback(cause, rollback_err)
        }
    }
}

#[async_trait]
impl UnitOfWork for Persistence {
    fn store(&self) -> Arc<dyn TokenStore> {
        self.store.clone()
    }

    async fn transaction<F, T>(&self, f: F) -> AppResult<T>
    where
        F: for<'a> FnOnce(TransactionContext<'a>) -> TxFuture<'a, T> + Send,
        T: Send,
    {
        let txn = self
            .db
            .begin_with_config(
                Some(IsolationLevel::ReadCommitted),
                Some(AccessMode::ReadWrite),
            )
            .await?;

        let outcome = {
            let tokens = TxTokenStore::new(&txn);
            AssertUnwindSafe(f(TransactionContext::new(&tokens)))
                .catch_unwind()
                .await
        };

        match outcome {
            Ok(Ok(value)) => {
                txn.commit().await?;
                Ok(value)
            }
            Ok(Err(e)) => Err(abort(txn, e).await),
            Err(payload) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::error!(error = %rollback_err, "Rollback after panic failed");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    async fn ping(&self) -> AppResult<()> {
        self.db
            .execute(Statement::from_string(
                self.db.get_database_backend(),
                "SELECT 1".to_string(),
            ))
            .await?;
        Ok(())
    }
}

/// Simpler API for executing transactional operations.
#[macro_export]
macro_rules! with_transaction {
    ($uow:expr, |$ctx:ident| $body:expr) => {
        $uow.transaction(|$ctx| Box::pin(async move { $body }))
            .await
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::entities::refresh_token;
    use chrono::{Duration, Utc};
    use domain::NewRefreshToken;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use uuid::Uuid;

    fn new_token() -> NewRefreshToken {
        NewRefreshToken {
            user_id: Uuid::new_v4(),
            token: "refresh".to_string(),
            expires_at: Utc::now() + Duration::days(7),
        }
    }

    fn stored(token: &NewRefreshToken) -> refresh_token::Model {
        refresh_token::Model {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            token: token.token.clone(),
            expires_at: token.expires_at,
            revoked: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commit_returns_value() {
        let token = new_token();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![stored(&token)]])
            .into_connection();
        let uow = Persistence::new(db);

        let result = with_transaction!(uow, |ctx| {
            ctx.tokens().insert_refresh_token(token).await?;
            Ok(42)
        });

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_failed_work_keeps_its_error() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .append_query_results([Vec::<refresh_token::Model>::new()])
            .into_connection();
        let uow = Persistence::new(db);

        let result: AppResult<()> = with_transaction!(uow, |ctx| {
            ctx.tokens().revoke_refresh_token("missing").await
        });

        assert!(matches!(result, Err(AppError::TokenNotFound)));
    }

    #[tokio::test]
    #[should_panic(expected = "work panicked")]
    async fn test_panic_is_reraised() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let uow = Persistence::new(db);

        let _: AppResult<()> = uow
            .transaction(|_ctx| {
                Box::pin(async move {
                    if Utc::now().timestamp() > 0 {
                        panic!("work panicked");
                    }
                    Ok(())
                })
            })
            .await;
    }

    #[test]
    fn test_clean_rollback_keeps_work_error() {
        let err = settle(AppError::TokenNotFound, Ok(()));
        assert!(matches!(err, AppError::TokenNotFound));
    }

    #[test]
    fn test_failed_rollback_is_reported_with_work_error() {
        let err = settle(
            AppError::TokenRevoked,
            Err(DbErr::Custom("connection reset".to_string())),
        );

        match &err {
            AppError::Rollback { source, rollback } => {
                assert!(matches!(source.as_ref(), AppError::TokenRevoked));
                assert!(rollback.contains("connection reset"));
            }
            other => panic!("expected rollback error, got {other:?}"),
        }
        assert_eq!(err.code(), "TOKEN_REVOKED");
    }

    #[tokio::test]
    async fn test_ping() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        tokio_test::assert_ok!(Persistence::new(db).ping().await);
    }
}
