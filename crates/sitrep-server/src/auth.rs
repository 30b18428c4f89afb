//! Bearer-token extraction: the principal is resolved on every request and
//! on every streaming handshake. No session state is kept server-side.

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use chrono::Duration;
use sitrep_core::{principal::User, store::IncidentStore};
use uuid::Uuid;

use crate::{
  AppState,
  error::{ApiError, classify},
};

/// Present in a handler's signature means the request carried a valid token
/// for a known principal.
pub struct CurrentUser(pub User);

/// Pull the bearer token out of an `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
  headers
    .get(header::AUTHORIZATION)?
    .to_str()
    .ok()?
    .strip_prefix("Bearer ")
}

/// Issue a token for `user_id` with the configured lifetime.
pub fn issue_token<S: IncidentStore>(
  state: &AppState<S>,
  user_id: Uuid,
) -> Result<String, ApiError> {
  state
    .signer
    .issue(user_id, Duration::days(state.config.token_ttl_days))
    .map_err(|e| ApiError::Internal(Box::new(e)))
}

/// Verify `token` and load its principal.
pub async fn resolve_user<S: IncidentStore>(
  state: &AppState<S>,
  token: &str,
) -> Result<User, ApiError> {
  let user_id = state.signer.verify(token).map_err(|e| match e {
    sitrep_auth::Error::Expired => ApiError::AuthExpired,
    other => ApiError::AuthInvalid(other.to_string()),
  })?;

  state
    .store
    .get_user(user_id)
    .await
    .map_err(classify)?
    .ok_or_else(|| ApiError::AuthInvalid("unknown principal".to_owned()))
}

impl<S> FromRequestParts<AppState<S>> for CurrentUser
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    let token = bearer_token(&parts.headers).ok_or(ApiError::AuthMissing)?;
    Ok(CurrentUser(resolve_user(state, token).await?))
  }
}
