pub mod entities;
pub mod token_store;

pub use token_store::{SeaTokenStore, TokenStore, TokenStoreTx, TxTokenStore};

#[cfg(any(test, feature = "test-utils"))]
pub use token_store::MockTokenStore;
