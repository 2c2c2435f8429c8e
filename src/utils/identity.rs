use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::errors::ApiError;
use crate::models::user::Actor;
use crate::state::AppState;

/// Extracts the acting user from the identity service's bearer token.
#[derive(Debug, PartialEq)]
pub struct AuthActor(pub Actor);

/// Like [`AuthActor`], but never rejects: endpoints with guest checkout
/// accept anonymous callers and decide per-request what they may do. A
/// present-but-invalid token is still an error.
#[derive(Debug, PartialEq)]
pub struct MaybeActor(pub Option<Actor>);

impl FromRequestParts<AppState> for MaybeActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(axum::http::header::AUTHORIZATION) {
            return Ok(MaybeActor(None));
        }
        let AuthActor(actor) = AuthActor::from_request_parts(parts, state).await?;
        Ok(MaybeActor(Some(actor)))
    }
}

impl FromRequestParts<AppState> for AuthActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::Auth("Missing credentials".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Auth("Invalid authorization header".into()))?;

        let data = state
            .jwt_keys
            .decode(token)
            .map_err(|_| ApiError::Auth("Invalid or expired token".into()))?;

        Ok(AuthActor(Actor {
            id: data.claims.sub,
            email: data.claims.email,
            role: data.claims.role,
        }))
    }
}
