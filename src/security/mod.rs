pub mod auth_api;
pub mod jwt;
pub mod password;
pub mod rate_limiter;

pub use auth_api::{auth_middleware, CurrentUser, Identity, IdentityContext, Principal, Role};
pub use jwt::{Claims, JwtManager};
pub use password::{Argon2Config, PasswordHasher};
pub use rate_limiter::{rate_limit_middleware, ClientRateLimiter, HttpRateLimitConfig};
