use std::str::FromStr;

use anyhow::{Context, Result};

use crate::idempotency::IdempotencyConfig;
use crate::security::auth_api::AuthConfig;
use crate::security::rate_limiter::HttpRateLimitConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub rate_limit: HttpRateLimitConfig,
    pub idempotency: IdempotencyConfig,
    pub tickets: TicketsConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Clone, Debug)]
pub struct TicketsConfig {
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for TicketsConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: String::new(),
                pool_size: 10,
            },
            auth: AuthConfig::default(),
            rate_limit: HttpRateLimitConfig::default(),
            idempotency: IdempotencyConfig::default(),
            tickets: TicketsConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let server = ServerConfig {
            host: std::env::var("HELPDESK_HOST").unwrap_or(defaults.server.host),
            port: env_or("PORT", defaults.server.port)?,
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL").unwrap_or_default(),
            pool_size: env_or("DATABASE_POOL_SIZE", defaults.database.pool_size)?,
        };

        let rate_limit = HttpRateLimitConfig {
            requests_per_minute: env_or(
                "RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit.requests_per_minute,
            )?,
        };

        let idempotency = IdempotencyConfig {
            wait_timeout_ms: env_or("IDEMPOTENCY_WAIT_MS", defaults.idempotency.wait_timeout_ms)?,
            poll_interval_ms: env_or("IDEMPOTENCY_POLL_MS", defaults.idempotency.poll_interval_ms)?,
            pending_ttl_secs: env_or(
                "IDEMPOTENCY_PENDING_TTL_SECS",
                defaults.idempotency.pending_ttl_secs,
            )?,
        };

        let tickets = TicketsConfig {
            default_page_size: defaults.tickets.default_page_size,
            max_page_size: env_or("LIST_MAX_LIMIT", defaults.tickets.max_page_size)?,
        };

        Ok(Self {
            server,
            database,
            auth: AuthConfig::from_env()?,
            rate_limit,
            idempotency,
            tickets,
        })
    }

    pub fn with_rate_limit(mut self, rate_limit: HttpRateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

pub(crate) fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: {raw}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.rate_limit.requests_per_minute, 60);
        assert_eq!(config.tickets.default_page_size, 20);
        assert_eq!(config.tickets.max_page_size, 100);
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
    }

    #[test]
    fn test_env_or_parses_and_falls_back() {
        std::env::set_var("HELPDESK_TEST_ENV_OR_OK", " 42 ");
        std::env::set_var("HELPDESK_TEST_ENV_OR_BAD", "forty-two");

        assert_eq!(env_or("HELPDESK_TEST_ENV_OR_OK", 1u32).ok(), Some(42));
        assert_eq!(env_or("HELPDESK_TEST_ENV_OR_MISSING", 7u32).ok(), Some(7));
        assert!(env_or("HELPDESK_TEST_ENV_OR_BAD", 1u32).is_err());
    }
}
