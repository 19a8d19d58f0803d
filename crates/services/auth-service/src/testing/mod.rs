//! In-memory store for tests.
//!
//! Transactions are serialized and run against a staged copy of the tables,
//! which replaces the committed copy only when the work returns `Ok`.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use sea_orm::DbErr;
use uuid::Uuid;

use crate::infra::unit_of_work::{TransactionContext, TxFuture, UnitOfWork};
use crate::repository::token_store::check_refresh_token;
use crate::repository::{TokenStore, TokenStoreTx};
use common::{AppError, AppResult, OptionExt};
use domain::{NewRefreshToken, RefreshToken, User};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<String, RefreshToken>,
}

impl Tables {
    fn user_by_email(&self, email: &str) -> Option<&User> {
        self.users.values().find(|u| u.email == email)
    }
}

#[derive(Default)]
struct Inner {
    committed: Mutex<Tables>,
    writer: tokio::sync::Mutex<()>,
    unavailable: AtomicBool,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.committed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::StoreFailure(DbErr::Custom(
                "store unavailable".to_string(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for Inner {
    async fn email_exists(&self, email: &str) -> AppResult<bool> {
        self.check_available()?;
        Ok(self.tables().user_by_email(email).is_some())
    }

    async fn find_by_email(&self, email: &str) -> AppResult<User> {
        self.check_available()?;
        self.tables().user_by_email(email).cloned().ok_or_not_found()
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<User> {
        self.check_available()?;
        self.tables().users.get(&id).cloned().ok_or_not_found()
    }

    async fn validate_refresh_token(&self, token: &str) -> AppResult<RefreshToken> {
        self.check_available()?;
        let record = self
            .tables()
            .refresh_tokens
            .get(token)
            .cloned()
            .ok_or(AppError::TokenNotFound)?;
        check_refresh_token(record, Utc::now())
    }
}

/// Staged tables for one transaction.
struct MemoryTx {
    staged: Mutex<Tables>,
}

impl MemoryTx {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn into_tables(self) -> Tables {
        self.staged.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TokenStoreTx for MemoryTx {
    async fn insert_user(&self, email: &str, password_hash: &str) -> AppResult<User> {
        let mut tables = self.tables();
        if tables.user_by_email(email).is_some() {
            return Err(AppError::EmailAlreadyExists);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn insert_refresh_token(&self, token: NewRefreshToken) -> AppResult<()> {
        let mut tables = self.tables();
        if !tables.users.contains_key(&token.user_id) {
            return Err(AppError::StoreFailure(DbErr::Custom(
                "refresh token owner does not exist".to_string(),
            )));
        }
        if tables.refresh_tokens.contains_key(&token.token) {
            return Err(AppError::StoreFailure(DbErr::Custom(
                "duplicate refresh token".to_string(),
            )));
        }

        let record = RefreshToken {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            token: token.token,
            expires_at: token.expires_at,
            revoked: false,
            created_at: Utc::now(),
        };
        tables.refresh_tokens.insert(record.token.clone(), record);
        Ok(())
    }

    async fn revoke_refresh_token(&self, token: &str) -> AppResult<()> {
        let mut tables = self.tables();
        let record = tables
            .refresh_tokens
            .get_mut(token)
            .ok_or(AppError::TokenNotFound)?;
        if record.revoked {
            return Err(AppError::TokenRevoked);
        }
        record.revoked = true;
        Ok(())
    }
}

/// In-memory [`UnitOfWork`] with inspection helpers for assertions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed user by email
    pub fn user(&self, email: &str) -> Option<User> {
        self.inner.tables().user_by_email(email).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.inner.tables().users.len()
    }

    /// Committed refresh token record
    pub fn refresh_token(&self, token: &str) -> Option<RefreshToken> {
        self.inner.tables().refresh_tokens.get(token).cloned()
    }

    /// All committed refresh tokens belonging to a user
    pub fn refresh_tokens_for(&self, user_id: Uuid) -> Vec<RefreshToken> {
        self.inner
            .tables()
            .refresh_tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Overwrite a committed refresh token record, e.g. to backdate it.
    pub fn put_refresh_token(&self, record: RefreshToken) {
        self.inner
            .tables()
            .refresh_tokens
            .insert(record.token.clone(), record);
    }

    /// Make every read and `ping` fail with a store error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl UnitOfWork for MemoryStore {
    fn store(&self) -> Arc<dyn TokenStore> {
        self.inner.clone()
    }

    async fn transaction<F, T>(&self, f: F) -> AppResult<T>
    where
        F: for<'a> FnOnce(TransactionContext<'a>) -> TxFuture<'a, T> + Send,
        T: Send,
    {
        self.inner.check_available()?;
        let _writer = self.inner.writer.lock().await;

        let tx = MemoryTx {
            staged: Mutex::new(self.inner.tables().clone()),
        };
        let outcome = AssertUnwindSafe(f(TransactionContext::new(&tx)))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                *self.inner.tables() = tx.into_tables();
                Ok(value)
            }
            Ok(Err(e)) => Err(e),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    async fn ping(&self) -> AppResult<()> {
        self.inner.check_available()
    }
}
