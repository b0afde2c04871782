use anyhow::{anyhow, Context};
use axum::{middleware, routing::get, Extension, Router};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::{health_check, shutdown_signal};
use crate::auth::configure_auth_routes;
use crate::core::config::AppConfig;
use crate::core::shared::error::ApiError;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::run_migrations;
use crate::security::auth_api::auth_middleware;
use crate::security::rate_limiter::{rate_limit_middleware, ClientRateLimiter};
use crate::storage::PgStore;
use crate::tickets::configure_tickets_routes;

const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}

/// Full HTTP surface. `/api` routes resolve the caller first, then apply the
/// per-caller rate limit.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Layers run last-added first: auth, then the limiter extension, then the limiter.
    let api = Router::new()
        .merge(configure_auth_routes())
        .merge(configure_tickets_routes(state.idempotency.clone()))
        .layer(middleware::from_fn(rate_limit_middleware))
        .layer(Extension(Arc::clone(&state.rate_limiter)))
        .layer(middleware::from_fn_with_state(
            state.identity.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn spawn_rate_limit_cleanup(limiter: Arc<ClientRateLimiter>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            limiter.cleanup();
        }
    });
}

/// Connects to Postgres, applies pending migrations and serves until a shutdown signal.
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let store = Arc::new(PgStore::connect(&config.database).context("Failed to connect to database")?);

    let pool = store.pool().clone();
    tokio::task::spawn_blocking(move || run_migrations(&pool))
        .await?
        .map_err(|e| anyhow!("Failed to run migrations: {e}"))?;

    let state = Arc::new(AppState::new(config, store)?);
    spawn_rate_limit_cleanup(Arc::clone(&state.rate_limiter));

    let addr = state.config.bind_address();
    let app = build_router(Arc::clone(&state));

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e} - is another instance running?");
        e
    })?;
    info!("HTTP server listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server failed")
}
