//! SeaORM entities.

pub mod refresh_token;
pub mod user;
