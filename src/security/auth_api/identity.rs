use std::sync::Arc;
use tracing::debug;

use super::{AuthConfig, Identity, Principal};
use crate::auth::users::{User, UserStore};
use crate::core::shared::error::ApiError;
use crate::security::jwt::{extract_bearer_token, JwtManager};

/// Turns an `Authorization` header into an [`Identity`] and issues credentials.
///
/// The role carried in a token is informational only; the authoritative role
/// is re-read from the user store on every request.
#[derive(Clone)]
pub struct IdentityContext {
    jwt: Arc<JwtManager>,
    users: Arc<dyn UserStore>,
    bearer_prefix: String,
}

impl IdentityContext {
    pub fn new(config: &AuthConfig, users: Arc<dyn UserStore>) -> anyhow::Result<Self> {
        Ok(Self {
            jwt: Arc::new(JwtManager::new(config)?),
            users,
            bearer_prefix: config.bearer_prefix.clone(),
        })
    }

    /// No header, or a non-bearer scheme, is anonymous. A bearer token that
    /// fails validation, or names a user that no longer exists, is rejected.
    pub async fn resolve(&self, authorization: Option<&str>) -> Result<Identity, ApiError> {
        let Some(token) = authorization.and_then(|h| extract_bearer_token(h, &self.bearer_prefix))
        else {
            return Ok(Identity::Anonymous);
        };

        let claims = self.jwt.validate(token).map_err(|e| {
            debug!("Rejected credential: {e}");
            invalid_token()
        })?;
        let user_id = claims.user_id().map_err(|_| invalid_token())?;

        match self.users.find_user(user_id).await? {
            Some(user) => Ok(Identity::Authenticated(user.principal())),
            None => {
                debug!(user_id, "Credential names an unknown user");
                Err(invalid_token())
            }
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, ApiError> {
        self.issue_for(&user.principal())
    }

    pub fn issue_for(&self, principal: &Principal) -> Result<String, ApiError> {
        self.jwt
            .issue(principal)
            .map_err(|e| ApiError::Internal(e.to_string()))
    }
}

impl std::fmt::Debug for IdentityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityContext")
            .field("jwt", &self.jwt)
            .finish_non_exhaustive()
    }
}

fn invalid_token() -> ApiError {
    ApiError::Unauthorized("Invalid token".to_string())
}
