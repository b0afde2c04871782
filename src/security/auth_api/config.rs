use anyhow::{bail, Result};
use tracing::warn;

use crate::core::config::env_or;

const DEV_JWT_SECRET: &str = "dev-secret-key-change-in-production-minimum-32-chars";

#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub issuer: String,
    pub audience: String,
    pub bearer_prefix: String,
    pub leeway_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl_hours: 24 * 7,
            issuer: "helpdesk".to_string(),
            audience: "helpdesk-api".to_string(),
            bearer_prefix: "Bearer ".to_string(),
            leeway_seconds: 30,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => config.jwt_secret = secret,
            _ => warn!(
                "JWT_SECRET not set, using default development secret - DO NOT USE IN PRODUCTION"
            ),
        }

        config.token_ttl_hours = env_or("JWT_TTL_HOURS", config.token_ttl_hours)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = secret.into();
        self
    }

    pub fn with_token_ttl_hours(mut self, hours: i64) -> Self {
        self.token_ttl_hours = hours;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.len() < 32 {
            bail!("JWT secret must be at least 32 characters");
        }
        if self.token_ttl_hours <= 0 {
            bail!("JWT_TTL_HOURS must be positive");
        }
        Ok(())
    }
}
