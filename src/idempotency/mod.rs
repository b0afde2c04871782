//! Exactly-once create semantics keyed by the `Idempotency-Key` header.

pub mod guard;
pub mod store;

pub use guard::{idempotency_middleware, IdempotencyGuard, IDEMPOTENCY_KEY_HEADER, REPLAY_HEADER};
pub use store::{IdempotencyRecord, IdempotencyStore, NewIdempotencyRecord, Reservation};

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// How long a duplicate waits for the first request's outcome.
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Pending reservations older than this are considered abandoned.
    pub pending_ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 5_000,
            poll_interval_ms: 100,
            pending_ttl_secs: 60,
        }
    }
}
