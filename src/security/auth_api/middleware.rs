use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, Request},
    middleware::Next,
    response::Response,
};

use super::{Identity, IdentityContext, Principal};
use crate::core::shared::error::ApiError;

/// Resolves the caller once per request and stores the [`Identity`] as an extension.
pub async fn auth_middleware(
    State(identity): State<IdentityContext>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let resolved = identity.resolve(authorization).await?;
    request.extensions_mut().insert(resolved);

    Ok(next.run(request).await)
}

/// Extractor for handlers that require a logged-in caller.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Identity>().copied().unwrap_or_default() {
            Identity::Authenticated(principal) => Ok(Self(principal)),
            Identity::Anonymous => Err(ApiError::login_required()),
        }
    }
}
