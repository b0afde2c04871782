use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};
use tracing::debug;

use crate::core::shared::error::ApiError;
use crate::security::auth_api::Identity;

pub type KeyedRateLimiter =
    GovernorRateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

#[derive(Debug, Clone)]
pub struct HttpRateLimitConfig {
    pub requests_per_minute: u32,
}

impl Default for HttpRateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
        }
    }
}

impl HttpRateLimitConfig {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
        }
    }
}

/// Per-caller budget: authenticated callers are keyed by user id, everyone else by IP.
pub struct ClientRateLimiter {
    limiter: KeyedRateLimiter,
    clock: DefaultClock,
}

impl ClientRateLimiter {
    pub fn new(config: &HttpRateLimitConfig) -> Self {
        const DEFAULT_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(60) {
            Some(v) => v,
            None => unreachable!(),
        };

        let quota = Quota::per_minute(
            NonZeroU32::new(config.requests_per_minute).unwrap_or(DEFAULT_PER_MINUTE),
        );

        Self {
            limiter: GovernorRateLimiter::keyed(quota),
            clock: DefaultClock::default(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&HttpRateLimitConfig::default())
    }

    /// `Err` carries the number of seconds until the next request would be allowed.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Err(wait.as_secs().max(1))
            }
        }
    }

    pub fn cleanup(&self) {
        self.limiter.retain_recent();
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}

impl std::fmt::Debug for ClientRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRateLimiter")
            .field("tracked_keys", &self.tracked_keys())
            .finish()
    }
}

pub async fn rate_limit_middleware(
    axum::Extension(limiter): axum::Extension<Arc<ClientRateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(&request);

    match limiter.check(&key) {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => {
            debug!(client = %key, retry_after_secs, "Rate limit exceeded");
            ApiError::RateLimited { retry_after_secs }.into_response()
        }
    }
}

fn client_key(request: &Request<Body>) -> String {
    if let Some(user_id) = request
        .extensions()
        .get::<Identity>()
        .and_then(Identity::user_id)
    {
        return format!("user:{user_id}");
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
        .unwrap_or_else(|| "ip:unknown".to_string())
}
