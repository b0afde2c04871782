use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::info;

use helpdesk::auth::seed_demo_users;
use helpdesk::core::shared::utils::run_migrations;
use helpdesk::main_module::run_server;
use helpdesk::security::password::PasswordHasher;
use helpdesk::storage::PgStore;
use helpdesk::AppConfig;

const USAGE: &str = "usage: helpdesk [serve|migrate|seed]";

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "helpdesk=info,tower_http=info".into()),
        )
        .with_target(false)
        .init();
}

async fn migrate(config: &AppConfig) -> Result<Arc<PgStore>> {
    let store = Arc::new(PgStore::connect(&config.database).context("Failed to connect to database")?);
    let pool = store.pool().clone();
    tokio::task::spawn_blocking(move || run_migrations(&pool))
        .await?
        .map_err(|e| anyhow!("Failed to run migrations: {e}"))?;
    Ok(store)
}

async fn seed(config: &AppConfig) -> Result<()> {
    let store = migrate(config).await?;
    let hasher = PasswordHasher::with_defaults()?;
    let users = seed_demo_users(store.as_ref(), &hasher)
        .await
        .map_err(|e| anyhow!("Seeding failed: {e}"))?;

    for user in &users {
        info!(user_id = user.id, email = %user.email, role = %user.role, "Demo account ready");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let command = std::env::args().nth(1);

    match command.as_deref() {
        None | Some("serve") => run_server(config).await,
        Some("migrate") => migrate(&config).await.map(|_| ()),
        Some("seed") => seed(&config).await,
        Some("--help" | "-h") => {
            println!("{USAGE}");
            Ok(())
        }
        Some(other) => bail!("unknown command '{other}'\n{USAGE}"),
    }
}
