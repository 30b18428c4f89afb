//! Handlers for `/incidents` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/incidents` | Optional `?status=`, `?severity=` filters |
//! | `POST` | `/incidents` | Writer; returns 201 + `{incident}` |
//! | `GET`  | `/incidents/{id}` | `{incident, updates, presence}` |
//! | `PATCH`| `/incidents/{id}/status` | Writer; transition table enforced |
//! | `POST` | `/incidents/{id}/assignees` | Writer; duplicate → conflict |
//! | `POST` | `/incidents/{id}/notes` | Writer; 1..=2000 chars after trim |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sitrep_core::{
  incident::{NewIncident, Severity, Status},
  policy::{Action, authorize},
  store::{IncidentQuery, IncidentStore},
};
use uuid::Uuid;

use crate::{
  AppState,
  auth::CurrentUser,
  error::{ApiError, classify},
  rt::{
    focus::color_for,
    hub::room_for,
    protocol::{MutationPayload, PresenceInfo, ServerEvent},
  },
};

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub status:   Option<Status>,
  pub severity: Option<Severity>,
}

/// `GET /incidents[?status=...][&severity=...]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  CurrentUser(_user): CurrentUser,
  Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  let incidents = state
    .store
    .list_incidents(IncidentQuery {
      status:   params.status,
      severity: params.severity,
    })
    .await
    .map_err(classify)?;
  Ok(Json(json!({ "incidents": incidents })))
}

// ─── Create ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
  pub title:       String,
  pub severity:    Severity,
  #[serde(default)]
  pub description: Option<String>,
}

/// `POST /incidents` — returns 201 + the created incident.
pub async fn create<S>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  authorize(user.role, Action::IncidentCreate).map_err(classify)?;

  let (incident, _seed) = state
    .store
    .create_incident(NewIncident {
      title:       body.title,
      description: body.description,
      severity:    body.severity,
      created_by:  user.user_id,
    })
    .await
    .map_err(classify)?;

  Ok((StatusCode::CREATED, Json(json!({ "incident": incident }))))
}

// ─── Get one ─────────────────────────────────────────────────────────────────

/// `GET /incidents/{id}` — projection, full audit log, and live presence.
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  CurrentUser(_user): CurrentUser,
  Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  let incident = state
    .store
    .get_incident(id)
    .await
    .map_err(classify)?
    .ok_or_else(|| ApiError::NotFound(format!("incident {id} not found")))?;

  let updates = state.store.list_updates(id).await.map_err(classify)?;
  let presence: Vec<PresenceInfo> = state
    .store
    .list_presence(id)
    .await
    .map_err(classify)?
    .into_iter()
    .map(|(entry, user)| PresenceInfo {
      color:          color_for(user.user_id),
      user,
      last_active_at: entry.last_active_at,
    })
    .collect();

  Ok(Json(json!({
    "incident": incident,
    "updates": updates,
    "presence": presence,
  })))
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StatusBody {
  pub status: Status,
}

/// `PATCH /incidents/{id}/status` — the same transition table the streaming
/// handler enforces applies here.
pub async fn patch_status<S>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<Uuid>,
  Json(body): Json<StatusBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  authorize(user.role, Action::IncidentUpdate).map_err(classify)?;

  let (incident, update) = state
    .store
    .update_status(id, body.status, user.user_id)
    .await
    .map_err(classify)?;

  state.hub.broadcast(
    &room_for(id),
    &ServerEvent::IncidentUpdated(MutationPayload {
      incident: incident.clone(),
      update,
    }),
    None,
  );
  Ok(Json(json!({ "incident": incident })))
}

// ─── Assignees ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssigneeBody {
  pub target_user_id: Uuid,
}

/// `POST /incidents/{id}/assignees`
pub async fn post_assignee<S>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<Uuid>,
  Json(body): Json<AssigneeBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  authorize(user.role, Action::IncidentAssign).map_err(classify)?;

  let (incident, update) = state
    .store
    .assign_user(id, body.target_user_id, user.user_id)
    .await
    .map_err(classify)?;

  state.hub.broadcast(
    &room_for(id),
    &ServerEvent::Assigned(MutationPayload {
      incident: incident.clone(),
      update,
    }),
    None,
  );
  Ok(Json(json!({ "incident": incident })))
}

// ─── Notes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NoteBody {
  pub text: String,
}

/// `POST /incidents/{id}/notes` — returns the appended audit record.
pub async fn post_note<S>(
  State(state): State<AppState<S>>,
  CurrentUser(user): CurrentUser,
  Path(id): Path<Uuid>,
  Json(body): Json<NoteBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  authorize(user.role, Action::IncidentNote).map_err(classify)?;

  let (incident, update) = state
    .store
    .add_note(id, user.user_id, body.text)
    .await
    .map_err(classify)?;

  state.hub.broadcast(
    &room_for(id),
    &ServerEvent::NoteAdded(MutationPayload {
      incident,
      update: update.clone(),
    }),
    None,
  );
  Ok(Json(json!({ "update": update })))
}
