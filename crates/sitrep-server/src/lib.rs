//! Sitrep server — JSON REST API and real-time session endpoint over a
//! shared incident store.
//!
//! Exposes an axum [`Router`] backed by any
//! [`IncidentStore`](sitrep_core::store::IncidentStore). The realtime
//! subsystem (room hub, focus registry, dispatcher) lives in [`rt`]; REST
//! handlers live in [`rest`] and broadcast through the same hub.

pub mod auth;
pub mod error;
pub mod rest;
pub mod rt;
pub mod sweeper;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  http::{HeaderValue, Method, header},
  routing::{get, patch, post},
};
use serde::Deserialize;
use sitrep_auth::TokenSigner;
use sitrep_core::store::IncidentStore;
use tower_http::cors::CorsLayer;

pub use error::ApiError;

use crate::rt::{focus::FocusRegistry, hub::RoomHub};

// ─── Configuration ───────────────────────────────────────────────────────────

fn default_token_ttl_days() -> i64 { 7 }
fn default_presence_ttl_secs() -> u64 { 300 }
fn default_heartbeat_secs() -> u64 { 60 }
fn default_focus_throttle_ms() -> u64 { 100 }

/// Runtime server configuration, deserialised from `config.toml` layered
/// with the `SITREP_*` environment.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,

  /// Bearer-token signing secret; at least 32 bytes.
  pub token_secret: String,

  #[serde(default = "default_token_ttl_days")]
  pub token_ttl_days:    i64,
  #[serde(default = "default_presence_ttl_secs")]
  pub presence_ttl_secs: u64,
  #[serde(default = "default_heartbeat_secs")]
  pub heartbeat_secs:    u64,
  #[serde(default = "default_focus_throttle_ms")]
  pub focus_throttle_ms: u64,

  /// Allowed browser origin; no CORS headers are emitted when unset.
  #[serde(default)]
  pub cors_origin: Option<String>,
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers and session tasks.
#[derive(Clone)]
pub struct AppState<S: IncidentStore> {
  pub store:  Arc<S>,
  pub signer: Arc<TokenSigner>,
  pub hub:    Arc<RoomHub>,
  pub focus:  Arc<FocusRegistry>,
  pub config: Arc<ServerConfig>,
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the full application router.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: IncidentStore + Clone + Send + Sync + 'static,
{
  let cors = cors_layer(state.config.cors_origin.as_deref());

  let router = Router::new()
    // Identity
    .route("/auth/register", post(rest::auth::register::<S>))
    .route("/auth/login", post(rest::auth::login::<S>))
    .route("/auth/me", get(rest::auth::me::<S>))
    // Incidents
    .route(
      "/incidents",
      get(rest::incidents::list::<S>).post(rest::incidents::create::<S>),
    )
    .route("/incidents/{id}", get(rest::incidents::get_one::<S>))
    .route(
      "/incidents/{id}/status",
      patch(rest::incidents::patch_status::<S>),
    )
    .route(
      "/incidents/{id}/assignees",
      post(rest::incidents::post_assignee::<S>),
    )
    .route("/incidents/{id}/notes", post(rest::incidents::post_note::<S>))
    // Users
    .route("/users", get(rest::users::list::<S>))
    .route("/users/{id}", get(rest::users::get_one::<S>))
    .route("/users/{id}/role", patch(rest::users::patch_role::<S>))
    // Streaming sessions
    .route("/ws", get(rt::session::ws_handler::<S>))
    .with_state(state);

  match cors {
    Some(layer) => router.layer(layer),
    None => router,
  }
}

fn cors_layer(origin: Option<&str>) -> Option<CorsLayer> {
  let origin = origin?;
  match origin.parse::<HeaderValue>() {
    Ok(value) => Some(
      CorsLayer::new()
        .allow_origin(value)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    ),
    Err(_) => {
      tracing::warn!("ignoring unparseable cors_origin: {origin:?}");
      None
    }
  }
}

// ─── Integration tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use chrono::Duration;
  use serde_json::{Value, json};
  use sitrep_core::principal::Role;
  use sitrep_store_sqlite::SqliteStore;
  use tower::ServiceExt as _;
  use uuid::Uuid;

  use super::{
    test_helpers::{make_state, seed_user},
    *,
  };

  async fn request(
    state: AppState<SqliteStore>,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
      builder =
        builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
      Some(json) => builder
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string())),
      None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
      .await
      .unwrap();
    let value = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
  }

  fn token_for(state: &AppState<SqliteStore>, user_id: Uuid) -> String {
    state.signer.issue(user_id, Duration::days(1)).unwrap()
  }

  // ── Registration & login ───────────────────────────────────────────────

  #[tokio::test]
  async fn first_registration_bootstraps_an_admin() {
    let state = make_state().await;

    let (status, body) = request(
      state.clone(),
      "POST",
      "/auth/register",
      None,
      Some(json!({
        "name": "Alice",
        "email": "Alice@Example.com",
        "password": "response-123",
      })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["role"], "admin");
    assert_eq!(body["user"]["email"], "alice@example.com");

    // The issued token immediately authenticates.
    let token = body["token"].as_str().unwrap().to_owned();
    let (status, me) =
      request(state.clone(), "GET", "/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user"]["email"], "alice@example.com");

    // Everyone after the first starts as a responder.
    let (_, second) = request(
      state,
      "POST",
      "/auth/register",
      None,
      Some(json!({
        "name": "Bob",
        "email": "bob@example.com",
        "password": "response-123",
      })),
    )
    .await;
    assert_eq!(second["user"]["role"], "responder");
  }

  #[tokio::test]
  async fn registration_validates_its_inputs() {
    let state = make_state().await;

    let (status, body) = request(
      state.clone(),
      "POST",
      "/auth/register",
      None,
      Some(json!({ "name": "X", "email": "x@example.com", "password": "short" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("password"));

    let (status, _) = request(
      state,
      "POST",
      "/auth/register",
      None,
      Some(json!({ "name": "X", "email": "not-an-email", "password": "response-123" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn duplicate_registration_is_rejected() {
    let state = make_state().await;
    seed_user(&state, "alice@example.com", Role::Admin).await;

    let (status, body) = request(
      state,
      "POST",
      "/auth/register",
      None,
      Some(json!({
        "name": "Alice II",
        "email": "alice@example.com",
        "password": "response-123",
      })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("already registered"));
  }

  #[tokio::test]
  async fn login_checks_the_password() {
    let state = make_state().await;
    seed_user(&state, "alice@example.com", Role::Responder).await;

    let (status, body) = request(
      state.clone(),
      "POST",
      "/auth/login",
      None,
      Some(json!({ "email": "alice@example.com", "password": "response-123" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].as_str().is_some());

    let (status, _) = request(
      state.clone(),
      "POST",
      "/auth/login",
      None,
      Some(json!({ "email": "alice@example.com", "password": "wrong-wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = request(
      state,
      "POST",
      "/auth/login",
      None,
      Some(json!({ "email": "nobody@example.com", "password": "response-123" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn requests_without_credentials_are_unauthorized() {
    let state = make_state().await;

    let (status, body) =
      request(state.clone(), "GET", "/incidents", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().is_some());

    let (status, _) = request(
      state,
      "GET",
      "/auth/me",
      Some("sitrep.not-a-real.token"),
      None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
  }

  // ── Incident flow ──────────────────────────────────────────────────────

  #[tokio::test]
  async fn incident_flow_over_rest() {
    let state = make_state().await;
    let admin = seed_user(&state, "admin@example.com", Role::Admin).await;
    let token = token_for(&state, admin.user_id);

    let (status, created) = request(
      state.clone(),
      "POST",
      "/incidents",
      Some(&token),
      Some(json!({ "title": "DB down", "severity": "high" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["incident"]["status"], "investigating");
    let id = created["incident"]["incidentId"].as_str().unwrap().to_owned();

    let (_, listed) = request(
      state.clone(),
      "GET",
      "/incidents?severity=high",
      Some(&token),
      None,
    )
    .await;
    assert_eq!(listed["incidents"].as_array().unwrap().len(), 1);

    let (status, patched) = request(
      state.clone(),
      "PATCH",
      &format!("/incidents/{id}/status"),
      Some(&token),
      Some(json!({ "status": "identified" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["incident"]["status"], "identified");

    let (status, noted) = request(
      state.clone(),
      "POST",
      &format!("/incidents/{id}/notes"),
      Some(&token),
      Some(json!({ "text": "  traced to replica lag  " })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(noted["update"]["content"]["text"], "traced to replica lag");

    let (status, full) = request(
      state,
      "GET",
      &format!("/incidents/{id}"),
      Some(&token),
      None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let updates = full["updates"].as_array().unwrap();
    let kinds: Vec<&str> =
      updates.iter().map(|u| u["kind"].as_str().unwrap()).collect();
    assert_eq!(kinds, ["status_change", "status_change", "note"]);
    assert!(full["presence"].as_array().unwrap().is_empty());
  }

  #[tokio::test]
  async fn rest_status_endpoint_enforces_the_transition_table() {
    let state = make_state().await;
    let admin = seed_user(&state, "admin@example.com", Role::Admin).await;
    let token = token_for(&state, admin.user_id);

    let (_, created) = request(
      state.clone(),
      "POST",
      "/incidents",
      Some(&token),
      Some(json!({ "title": "API latency", "severity": "medium" })),
    )
    .await;
    let id = created["incident"]["incidentId"].as_str().unwrap().to_owned();

    request(
      state.clone(),
      "PATCH",
      &format!("/incidents/{id}/status"),
      Some(&token),
      Some(json!({ "status": "resolved" })),
    )
    .await;

    let (status, body) = request(
      state,
      "PATCH",
      &format!("/incidents/{id}/status"),
      Some(&token),
      Some(json!({ "status": "monitoring" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("illegal"));
  }

  #[tokio::test]
  async fn viewers_cannot_write_over_rest() {
    let state = make_state().await;
    let viewer = seed_user(&state, "viewer@example.com", Role::Viewer).await;
    let token = token_for(&state, viewer.user_id);

    let (status, _) = request(
      state.clone(),
      "POST",
      "/incidents",
      Some(&token),
      Some(json!({ "title": "DB down", "severity": "high" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Reads still work.
    let (status, _) =
      request(state, "GET", "/incidents", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
  }

  #[tokio::test]
  async fn duplicate_assignee_over_rest_is_a_conflict() {
    let state = make_state().await;
    let admin = seed_user(&state, "admin@example.com", Role::Admin).await;
    let responder = seed_user(&state, "r@example.com", Role::Responder).await;
    let token = token_for(&state, admin.user_id);

    let (_, created) = request(
      state.clone(),
      "POST",
      "/incidents",
      Some(&token),
      Some(json!({ "title": "DB down", "severity": "high" })),
    )
    .await;
    let id = created["incident"]["incidentId"].as_str().unwrap().to_owned();

    let assign = json!({ "targetUserId": responder.user_id });
    let (status, body) = request(
      state.clone(),
      "POST",
      &format!("/incidents/{id}/assignees"),
      Some(&token),
      Some(assign.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["incident"]["assignees"].as_array().unwrap().len(), 1);

    let (status, _) = request(
      state,
      "POST",
      &format!("/incidents/{id}/assignees"),
      Some(&token),
      Some(assign),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn unknown_incident_is_not_found() {
    let state = make_state().await;
    let admin = seed_user(&state, "admin@example.com", Role::Admin).await;
    let token = token_for(&state, admin.user_id);

    let (status, _) = request(
      state,
      "GET",
      &format!("/incidents/{}", Uuid::new_v4()),
      Some(&token),
      None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  // ── Users ──────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn role_management_is_admin_only() {
    let state = make_state().await;
    let admin = seed_user(&state, "admin@example.com", Role::Admin).await;
    let responder = seed_user(&state, "r@example.com", Role::Responder).await;
    let admin_token = token_for(&state, admin.user_id);
    let responder_token = token_for(&state, responder.user_id);

    let (status, _) = request(
      state.clone(),
      "PATCH",
      &format!("/users/{}/role", admin.user_id),
      Some(&responder_token),
      Some(json!({ "role": "viewer" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = request(
      state.clone(),
      "PATCH",
      &format!("/users/{}/role", responder.user_id),
      Some(&admin_token),
      Some(json!({ "role": "viewer" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["role"], "viewer");

    let (_, filtered) = request(
      state,
      "GET",
      "/users?role=viewer",
      Some(&admin_token),
      None,
    )
    .await;
    assert_eq!(filtered["users"].as_array().unwrap().len(), 1);
  }
}

// ─── Shared test helpers ─────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod test_helpers {
  use std::{sync::Arc, time::Duration};

  use sitrep_auth::TokenSigner;
  use sitrep_core::{
    principal::{NewUser, Role, User},
    store::IncidentStore,
  };
  use sitrep_store_sqlite::SqliteStore;

  use crate::{
    AppState, ServerConfig,
    rt::{focus::FocusRegistry, hub::RoomHub},
  };

  pub(crate) const TEST_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

  pub(crate) async fn make_state() -> AppState<SqliteStore> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    AppState {
      store:  Arc::new(store),
      signer: Arc::new(TokenSigner::new(TEST_SECRET).unwrap()),
      hub:    Arc::new(RoomHub::new()),
      focus:  Arc::new(FocusRegistry::new(Duration::from_millis(100))),
      config: Arc::new(ServerConfig {
        host:              "127.0.0.1".to_owned(),
        port:              0,
        store_path:        ":memory:".into(),
        token_secret:      String::from_utf8_lossy(TEST_SECRET).into_owned(),
        token_ttl_days:    7,
        presence_ttl_secs: 300,
        heartbeat_secs:    60,
        focus_throttle_ms: 100,
        cors_origin:       None,
      }),
    }
  }

  /// Insert a user directly, skipping the registration endpoint. The stored
  /// hash matches the password `response-123`.
  pub(crate) async fn seed_user(
    state: &AppState<SqliteStore>,
    email: &str,
    role: Role,
  ) -> User {
    state
      .store
      .create_user(NewUser {
        name: email.split('@').next().unwrap().to_owned(),
        email: email.to_owned(),
        password_hash: sitrep_auth::hash_password("response-123").unwrap(),
        role,
      })
      .await
      .unwrap()
  }
}
