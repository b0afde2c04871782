use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::security::auth_api::{AuthConfig, Principal, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64> {
        self.sub
            .parse()
            .map_err(|e| anyhow!("Invalid user ID in claims: {e}"))
    }
}

pub struct JwtManager {
    issuer: String,
    audience: String,
    ttl: Duration,
    leeway_seconds: u64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtManager")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl", &self.ttl)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

impl JwtManager {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        config.validate()?;
        let secret = config.jwt_secret.as_bytes();
        Ok(Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            ttl: Duration::hours(config.token_ttl_hours),
            leeway_seconds: config.leeway_seconds,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        })
    }

    pub fn issue(&self, principal: &Principal) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: principal.id.to_string(),
            role: principal.role,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow!("Failed to encode token: {e}"))
    }

    pub fn validate(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.leeway = self.leeway_seconds;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| anyhow!("Token validation failed: {e}"))
    }
}

pub fn extract_bearer_token<'a>(auth_header: &'a str, prefix: &str) -> Option<&'a str> {
    auth_header
        .strip_prefix(prefix)
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
