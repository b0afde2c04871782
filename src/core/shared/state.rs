use std::sync::Arc;

use crate::auth::users::UserStore;
use crate::core::config::AppConfig;
use crate::idempotency::{IdempotencyGuard, IdempotencyStore};
use crate::security::auth_api::IdentityContext;
use crate::security::password::{Argon2Config, PasswordHasher};
use crate::security::rate_limiter::ClientRateLimiter;
use crate::tickets::{TicketEngine, TicketStore};

/// Everything a request handler may touch. Built once at startup and shared
/// behind an `Arc`; there is no process-wide mutable state.
pub struct AppState {
    pub config: AppConfig,
    pub tickets: TicketEngine,
    pub users: Arc<dyn UserStore>,
    pub identity: IdentityContext,
    pub passwords: PasswordHasher,
    pub idempotency: IdempotencyGuard,
    pub rate_limiter: Arc<ClientRateLimiter>,
}

impl AppState {
    /// Wires every component to one backend that implements all store contracts.
    pub fn new<S>(config: AppConfig, store: Arc<S>) -> anyhow::Result<Self>
    where
        S: TicketStore + UserStore + IdempotencyStore + 'static,
    {
        Self::with_stores(config, store.clone(), store.clone(), store)
    }

    pub fn with_stores(
        config: AppConfig,
        tickets: Arc<dyn TicketStore>,
        users: Arc<dyn UserStore>,
        idempotency: Arc<dyn IdempotencyStore>,
    ) -> anyhow::Result<Self> {
        Self::with_password_hasher(
            config,
            tickets,
            users,
            idempotency,
            PasswordHasher::new(&Argon2Config::default())?,
        )
    }

    pub fn with_password_hasher(
        config: AppConfig,
        tickets: Arc<dyn TicketStore>,
        users: Arc<dyn UserStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        passwords: PasswordHasher,
    ) -> anyhow::Result<Self> {
        let identity = IdentityContext::new(&config.auth, users.clone())?;

        Ok(Self {
            tickets: TicketEngine::new(tickets, config.tickets.clone()),
            idempotency: IdempotencyGuard::new(idempotency, config.idempotency.clone()),
            rate_limiter: Arc::new(ClientRateLimiter::new(&config.rate_limit)),
            users,
            identity,
            passwords,
            config,
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("identity", &self.identity)
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}
