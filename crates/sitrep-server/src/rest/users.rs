//! Handlers for `/users` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/users` | Optional `?role=` filter |
//! | `GET`  | `/users/{id}` | Single user |
//! | `PATCH`| `/users/{id}/role` | Admin only |

use axum::{
  Json,
  extract::{Path, Query, State},
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sitrep_core::{
  policy::{Action, authorize},
  principal::Role,
  store::IncidentStore,
};
use uuid::Uuid;

use crate::{
  AppState,
  auth::CurrentUser,
  error::{ApiError, classify},
};

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub role: Option<Role>,
}

/// `GET /users[?role=...]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  CurrentUser(_user): CurrentUser,
  Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  let users = state.store.list_users(params.role).await.map_err(classify)?;
  Ok(Json(json!({ "users": users })))
}

/// `GET /users/{id}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  CurrentUser(_user): CurrentUser,
  Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  let user = state
    .store
    .get_user(id)
    .await
    .map_err(classify)?
    .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))?;
  Ok(Json(json!({ "user": user })))
}

#[derive(Debug, Deserialize)]
pub struct RoleBody {
  pub role: Role,
}

/// `PATCH /users/{id}/role` — admin only.
pub async fn patch_role<S>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<Uuid>,
  Json(body): Json<RoleBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  authorize(user.role, Action::UserManage).map_err(classify)?;

  let updated = state
    .store
    .set_user_role(id, body.role)
    .await
    .map_err(classify)?;
  Ok(Json(json!({ "user": updated })))
}
