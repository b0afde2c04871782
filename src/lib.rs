pub mod auth;
pub mod core;
pub mod idempotency;
pub mod main_module;
pub mod security;
pub mod storage;
pub mod tickets;

pub use crate::core::config::AppConfig;
pub use crate::core::shared::error::ApiError;
pub use crate::core::shared::state::AppState;
pub use crate::main_module::build_router;
