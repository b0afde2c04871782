//! Persistence backends.
//!
//! Every store contract (`TicketStore`, `UserStore`, `IdempotencyStore`) is
//! implemented twice: [`PgStore`] on Postgres through diesel, and
//! [`MemoryStore`] for tests and local experiments.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::core::shared::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate value violates unique constraint: {0}")]
    Duplicate(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(detail) => Self::Conflict(detail),
            StoreError::Backend(detail) => Self::Internal(detail),
        }
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match e {
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::Duplicate(info.message().to_string())
            }
            other => Self::Backend(format!("Database error: {other}")),
        }
    }
}

impl From<diesel::r2d2::PoolError> for StoreError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Self::Backend(format!("Connection pool error: {e}"))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Backend(format!("Blocking task failed: {e}"))
    }
}
