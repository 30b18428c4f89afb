//! Handlers for `/auth` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/auth/register` | Body: [`RegisterBody`]; returns 201 + `{user, token}` |
//! | `POST` | `/auth/login` | Body: [`LoginBody`]; returns `{user, token}` |
//! | `GET`  | `/auth/me` | Returns `{user}` for the presented token |

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use serde_json::json;
use sitrep_core::{
  principal::{NewUser, Role},
  store::IncidentStore,
};

use crate::{
  AppState,
  auth::{CurrentUser, issue_token},
  error::{ApiError, classify},
};

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
  pub name:     String,
  pub email:    String,
  pub password: String,
}

/// `POST /auth/register`
///
/// The first registered user becomes an admin so someone can manage roles;
/// everyone after that starts as a responder.
pub async fn register<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  let name = body.name.trim().to_owned();
  if name.is_empty() {
    return Err(ApiError::Validation("name must not be empty".to_owned()));
  }
  let email = body.email.trim().to_lowercase();
  if !email.contains('@') {
    return Err(ApiError::Validation("email is not valid".to_owned()));
  }
  if body.password.chars().count() < 8 {
    return Err(ApiError::Validation(
      "password must be at least 8 characters".to_owned(),
    ));
  }

  // Argon2 is deliberately slow; keep it off the async workers.
  let password_hash = tokio::task::spawn_blocking(move || {
    sitrep_auth::hash_password(&body.password)
  })
  .await
  .map_err(|e| ApiError::Internal(Box::new(e)))?
  .map_err(|e| ApiError::Internal(Box::new(e)))?;

  let count = state.store.count_users().await.map_err(classify)?;
  let role = if count == 0 { Role::Admin } else { Role::Responder };

  let user = state
    .store
    .create_user(NewUser { name, email, password_hash, role })
    .await
    .map_err(classify)?;
  let token = issue_token(&state, user.user_id)?;

  Ok((StatusCode::CREATED, Json(json!({ "user": user, "token": token }))))
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
  pub email:    String,
  pub password: String,
}

/// `POST /auth/login`
pub async fn login<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<LoginBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  let email = body.email.trim().to_lowercase();
  // One failure message for both unknown email and wrong password.
  let invalid = || ApiError::AuthInvalid("invalid email or password".to_owned());

  let (user, stored_hash) = state
    .store
    .find_user_by_email(&email)
    .await
    .map_err(classify)?
    .ok_or_else(invalid)?;

  let verified = tokio::task::spawn_blocking(move || {
    sitrep_auth::verify_password(&body.password, &stored_hash)
  })
  .await
  .map_err(|e| ApiError::Internal(Box::new(e)))?
  .map_err(|e| ApiError::Internal(Box::new(e)))?;

  if !verified {
    return Err(invalid());
  }

  let token = issue_token(&state, user.user_id)?;
  Ok(Json(json!({ "user": user, "token": token })))
}

/// `GET /auth/me`
pub async fn me<S>(
  CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  Ok(Json(json!({ "user": user })))
}
