use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::storage::StoreError;

/// A reserved idempotency key. `status` and `response_body` stay `None`
/// while the first request holding the key is still running.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub method: String,
    pub path: String,
    pub user_id: Option<i64>,
    pub status: Option<u16>,
    pub response_body: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_complete(&self) -> bool {
        self.status.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewIdempotencyRecord {
    pub key: String,
    pub method: String,
    pub path: String,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// The caller now owns the key and must `complete` or `release` it.
    Reserved,
    Existing(IdempotencyRecord),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claims `record.key`, relying on the key's uniqueness.
    async fn reserve(&self, record: NewIdempotencyRecord) -> Result<Reservation, StoreError>;

    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError>;

    async fn complete(&self, key: &str, status: u16, body: Value) -> Result<(), StoreError>;

    /// Drops a pending reservation. Completed records are left alone.
    async fn release(&self, key: &str) -> Result<(), StoreError>;
}
