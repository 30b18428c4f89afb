//! Focus registry — ephemeral per-principal cursor state.
//!
//! In-memory only; a principal holds at most one focus at any time, across
//! all incidents. Built once at server start and shared via `Arc` — no
//! process-wide globals.

use std::{
  collections::HashMap,
  time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::rt::{hub::SessionId, protocol::FocusSection};

/// Fixed display palette. Assignment is a stable hash of the principal id,
/// so the same principal gets the same color across sessions and servers.
pub const PALETTE: [&str; 8] = [
  "#e6194b", "#3cb44b", "#ffb300", "#4363d8", "#f58231", "#911eb4",
  "#0bb4c4", "#f032e6",
];

pub fn color_for(user_id: Uuid) -> &'static str {
  let n = user_id
    .as_bytes()
    .iter()
    .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as usize));
  PALETTE[n % PALETTE.len()]
}

/// One principal's cursor position within an incident.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusEntry {
  pub user_id:     Uuid,
  pub incident_id: Uuid,
  pub section:     FocusSection,
  pub field_id:    Option<String>,
  pub color:       &'static str,
  pub last_update: DateTime<Utc>,
}

/// Outcome of [`FocusRegistry::update`].
pub enum FocusOutcome {
  /// Dropped by the per-principal throttle; nothing to broadcast.
  Throttled,
  Updated {
    entry:     FocusEntry,
    /// Previous entry displaced from a *different* incident; its room must
    /// receive `focus:cleared`.
    displaced: Option<FocusEntry>,
  },
}

#[derive(Default)]
struct FocusInner {
  entries:       HashMap<Uuid, FocusEntry>,
  /// Throttle bookkeeping keyed by principal. The session id is recorded so
  /// the window resets when the same principal reconnects under a new
  /// session.
  last_accepted: HashMap<Uuid, (SessionId, Instant)>,
}

pub struct FocusRegistry {
  inner:    Mutex<FocusInner>,
  throttle: Duration,
}

impl FocusRegistry {
  pub fn new(throttle: Duration) -> Self {
    Self { inner: Mutex::new(FocusInner::default()), throttle }
  }

  /// Record a focus move. Accepts at most one update per throttle window per
  /// principal; excess calls are dropped silently.
  pub fn update(
    &self,
    user_id: Uuid,
    session: SessionId,
    incident_id: Uuid,
    section: FocusSection,
    field_id: Option<String>,
  ) -> FocusOutcome {
    let now = Instant::now();
    let mut inner = self.inner.lock();

    if let Some((last_session, at)) = inner.last_accepted.get(&user_id)
      && *last_session == session
      && now.duration_since(*at) < self.throttle
    {
      return FocusOutcome::Throttled;
    }
    inner.last_accepted.insert(user_id, (session, now));

    let entry = FocusEntry {
      user_id,
      incident_id,
      section,
      field_id,
      color: color_for(user_id),
      last_update: Utc::now(),
    };
    let displaced = inner
      .entries
      .insert(user_id, entry.clone())
      .filter(|prev| prev.incident_id != incident_id);

    FocusOutcome::Updated { entry, displaced }
  }

  /// Clear the principal's focus if it points at `incident_id` (blur or
  /// room leave), returning the removed entry.
  pub fn clear_for_incident(
    &self,
    user_id: Uuid,
    incident_id: Uuid,
  ) -> Option<FocusEntry> {
    let mut inner = self.inner.lock();
    match inner.entries.get(&user_id) {
      Some(entry) if entry.incident_id == incident_id => {
        inner.entries.remove(&user_id)
      }
      _ => None,
    }
  }

  /// Current focus entries for an incident — the initial `focus:list` sent
  /// to a joining session.
  pub fn list_for_incident(&self, incident_id: Uuid) -> Vec<FocusEntry> {
    self
      .inner
      .lock()
      .entries
      .values()
      .filter(|entry| entry.incident_id == incident_id)
      .cloned()
      .collect()
  }

  /// Drop all state for a principal (disconnect), returning the removed
  /// focus entry if one existed.
  pub fn remove_by_principal(&self, user_id: Uuid) -> Option<FocusEntry> {
    let mut inner = self.inner.lock();
    inner.last_accepted.remove(&user_id);
    inner.entries.remove(&user_id)
  }
}
