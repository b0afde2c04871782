//! Caller identity: roles and capabilities, credential resolution, and the
//! request-level middleware and extractor built on them.

pub mod config;
pub mod identity;
pub mod middleware;
pub mod types;

pub use config::AuthConfig;
pub use identity::IdentityContext;
pub use middleware::{auth_middleware, CurrentUser};
pub use types::{Capability, Identity, Principal, Role};
