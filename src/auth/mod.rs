pub mod users;

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::shared::error::{ApiError, ApiJson};
use crate::core::shared::state::AppState;
use crate::security::auth_api::Role;
use crate::security::password::PasswordHasher;
use crate::storage::StoreError;

pub use users::{
    normalize_email, AuthResponse, LoginRequest, NewUser, RegisterRequest, User,
    UserCredentials, UserStore,
};

const DEMO_ACCOUNTS: [(&str, Role, &str); 3] = [
    ("user@example.com", Role::User, "password"),
    ("agent@example.com", Role::Agent, "password"),
    ("admin@mail.com", Role::Admin, "admin123"),
];

fn required(value: Option<String>, field: &'static str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::field_required(field))
}

fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid credentials".to_string())
}

async fn hash_password(hasher: &PasswordHasher, password: String) -> Result<String, ApiError> {
    let hasher = hasher.clone();
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await?
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn verify_password(
    hasher: &PasswordHasher,
    password: String,
    hash: String,
) -> Result<bool, ApiError> {
    let hasher = hasher.clone();
    tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
        .await?
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Creates an account. Callers choose their own role; anything unrecognised becomes `user`.
pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = normalize_email(&required(request.email, "email")?);
    let password = required(request.password, "password")?;
    let role = request
        .role
        .as_deref()
        .map(Role::parse_or_user)
        .unwrap_or_default();

    let password_hash = hash_password(&state.passwords, password).await?;
    let user = state
        .users
        .insert_user(NewUser {
            email,
            password_hash,
            role,
            created_at: Utc::now(),
        })
        .await
        .map_err(|e| match e {
            StoreError::Duplicate(_) => ApiError::Conflict("Email already registered".to_string()),
            other => other.into(),
        })?;

    let token = state.identity.issue(&user)?;
    info!(user_id = user.id, role = %user.role, "User registered");
    Ok(Json(AuthResponse { token, user }))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = normalize_email(&required(request.email, "email")?);
    let password = required(request.password, "password")?;

    let Some(credentials) = state.users.find_credentials(&email).await? else {
        return Err(invalid_credentials());
    };

    if !verify_password(&state.passwords, password, credentials.password_hash).await? {
        warn!(user_id = credentials.user.id, "Failed login attempt");
        return Err(invalid_credentials());
    }

    let token = state.identity.issue(&credentials.user)?;
    Ok(Json(AuthResponse {
        token,
        user: credentials.user,
    }))
}

/// Ensures the demo accounts exist. Existing accounts are left untouched.
pub async fn seed_demo_users(
    users: &dyn UserStore,
    hasher: &PasswordHasher,
) -> Result<Vec<User>, ApiError> {
    let mut seeded = Vec::with_capacity(DEMO_ACCOUNTS.len());

    for (email, role, password) in DEMO_ACCOUNTS {
        if let Some(existing) = users.find_credentials(email).await? {
            seeded.push(existing.user);
            continue;
        }

        let password_hash = hash_password(hasher, password.to_string()).await?;
        let user = users
            .insert_user(NewUser {
                email: email.to_string(),
                password_hash,
                role,
                created_at: Utc::now(),
            })
            .await?;
        info!(user_id = user.id, email, role = %role, "Seeded demo user");
        seeded.push(user);
    }

    Ok(seeded)
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/register", post(register))
        .route("/api/login", post(login))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::password::Argon2Config;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = MemoryStore::new();
        let hasher = PasswordHasher::new(&Argon2Config::minimal()).expect("hasher");

        let first = seed_demo_users(&store, &hasher).await.expect("seed");
        let second = seed_demo_users(&store, &hasher).await.expect("reseed");

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(first[2].role, Role::Admin);

        let admin = store
            .find_credentials("admin@mail.com")
            .await
            .expect("find")
            .expect("admin");
        assert!(hasher.verify("admin123", &admin.password_hash).expect("verify"));
    }

    #[test]
    fn test_required_rejects_blank() {
        assert!(required(Some("  ".into()), "email").is_err());
        assert_eq!(required(Some("a".into()), "email").ok().as_deref(), Some("a"));
    }
}
