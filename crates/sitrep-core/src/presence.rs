//! Presence — the fact that a principal is currently observing an incident.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One (principal, incident) presence row. Uniquely keyed by that pair;
/// joining again under a new session replaces the old row (later session
/// wins), so a reconnect never leaves a ghost entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
  pub user_id:        Uuid,
  pub incident_id:    Uuid,
  pub session_id:     Uuid,
  /// Refreshed by heartbeats; entries go stale after the inactivity TTL.
  pub last_active_at: DateTime<Utc>,
}
