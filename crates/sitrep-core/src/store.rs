//! The `IncidentStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g.
//! `sitrep-store-sqlite`). Higher layers depend on this abstraction, not on
//! any concrete backend.
//!
//! Every mutation persists the incident projection change and its audit
//! record atomically and returns both, so callers can broadcast exactly what
//! was persisted — a broadcast must never observe unpersisted state.
//!
//! All methods return `Send` futures so the trait can be used in
//! multi-threaded async runtimes (tokio with `axum`).

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  incident::{Incident, NewIncident, Severity, Status},
  presence::PresenceEntry,
  principal::{NewUser, Role, User},
  update::Update,
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Filters for [`IncidentStore::list_incidents`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IncidentQuery {
  pub status:   Option<Status>,
  pub severity: Option<Severity>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Sitrep storage backend.
pub trait IncidentStore: Send + Sync {
  type Error: std::error::Error + crate::Classify + Send + Sync + 'static;

  // ── Users ─────────────────────────────────────────────────────────────

  /// Create and persist a user. Fails if the email is already registered.
  fn create_user(
    &self,
    input: NewUser,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  /// Retrieve a user by id. Returns `None` if not found.
  fn get_user(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  /// Look up a user by email for login, returning the stored password hash
  /// (a PHC string) alongside the user.
  fn find_user_by_email<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<Option<(User, String)>, Self::Error>>
  + Send
  + 'a;

  /// List users, optionally filtered by role.
  fn list_users(
    &self,
    role: Option<Role>,
  ) -> impl Future<Output = Result<Vec<User>, Self::Error>> + Send + '_;

  /// Change a user's role. Fails if the user does not exist.
  fn set_user_role(
    &self,
    id: Uuid,
    role: Role,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  /// Total registered users — drives the first-user-becomes-admin bootstrap.
  fn count_users(
    &self,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  // ── Incidents ─────────────────────────────────────────────────────────

  /// Create an incident with status `investigating` and commander = creator,
  /// seeding a `status_change` audit record with a null previous status.
  fn create_incident(
    &self,
    input: NewIncident,
  ) -> impl Future<Output = Result<(Incident, Update), Self::Error>> + Send + '_;

  /// Retrieve the current projection. Returns `None` if not found.
  fn get_incident(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Incident>, Self::Error>> + Send + '_;

  /// List incidents matching `query`, most recently created first.
  fn list_incidents(
    &self,
    query: IncidentQuery,
  ) -> impl Future<Output = Result<Vec<Incident>, Self::Error>> + Send + '_;

  /// All audit records for an incident, ordered by `created_at`, ties broken
  /// by id.
  fn list_updates(
    &self,
    incident_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Update>, Self::Error>> + Send + '_;

  // ── Mutations (projection + audit record, atomically) ─────────────────

  /// Apply a status transition. Fails on an illegal or same-state
  /// transition. Sets `resolved_at` iff this is the first entry to
  /// `resolved`.
  fn update_status(
    &self,
    incident_id: Uuid,
    new_status: Status,
    author: Uuid,
  ) -> impl Future<Output = Result<(Incident, Update), Self::Error>> + Send + '_;

  /// Append a note. The text is trimmed and length-checked.
  fn add_note(
    &self,
    incident_id: Uuid,
    author: Uuid,
    text: String,
  ) -> impl Future<Output = Result<(Incident, Update), Self::Error>> + Send + '_;

  /// Add `target` to the assignee set. Duplicate assignment is rejected.
  fn assign_user(
    &self,
    incident_id: Uuid,
    target: Uuid,
    author: Uuid,
  ) -> impl Future<Output = Result<(Incident, Update), Self::Error>> + Send + '_;

  /// Remove `target` from the assignee set. Absent unassignment is rejected.
  fn unassign_user(
    &self,
    incident_id: Uuid,
    target: Uuid,
    author: Uuid,
  ) -> impl Future<Output = Result<(Incident, Update), Self::Error>> + Send + '_;

  /// Append an action item with `completed` seeded false.
  fn add_action_item(
    &self,
    incident_id: Uuid,
    author: Uuid,
    text: String,
  ) -> impl Future<Output = Result<(Incident, Update), Self::Error>> + Send + '_;

  /// Set an action item's `completed` flag to the explicit boolean — the
  /// only mutation the audit log permits, idempotent under reconnect
  /// retries. Fails if the update is not an action item.
  fn toggle_action_item(
    &self,
    update_id: Uuid,
    completed: bool,
  ) -> impl Future<Output = Result<(Incident, Update), Self::Error>> + Send + '_;

  // ── Presence ──────────────────────────────────────────────────────────

  /// Insert or replace the (user, incident) presence row; the later session
  /// always wins.
  fn upsert_presence(
    &self,
    user_id: Uuid,
    incident_id: Uuid,
    session_id: Uuid,
  ) -> impl Future<Output = Result<PresenceEntry, Self::Error>> + Send + '_;

  /// Remove one presence row, returning it if it existed.
  fn remove_presence(
    &self,
    user_id: Uuid,
    incident_id: Uuid,
  ) -> impl Future<Output = Result<Option<PresenceEntry>, Self::Error>>
  + Send
  + '_;

  /// Remove every presence row of a session (socket disconnect), returning
  /// the removed rows so the caller can broadcast "left" per incident room.
  fn remove_presence_by_session(
    &self,
    session_id: Uuid,
  ) -> impl Future<Output = Result<Vec<PresenceEntry>, Self::Error>> + Send + '_;

  /// Refresh `last_active_at` on every row of a session.
  fn heartbeat_presence(
    &self,
    session_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Current presence for an incident, with principal metadata for display.
  fn list_presence(
    &self,
    incident_id: Uuid,
  ) -> impl Future<Output = Result<Vec<(PresenceEntry, User)>, Self::Error>>
  + Send
  + '_;

  /// Delete rows with `last_active_at < cutoff`, returning them so the
  /// sweeper can broadcast "left" events.
  fn sweep_presence(
    &self,
    cutoff: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<PresenceEntry>, Self::Error>> + Send + '_;
}
