//! Incidents and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Severity ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Critical,
  High,
  Medium,
  Low,
}

impl Severity {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Critical => "critical",
      Self::High => "high",
      Self::Medium => "medium",
      Self::Low => "low",
    }
  }
}

// ─── Status ──────────────────────────────────────────────────────────────────

/// Incident lifecycle status. Transitions are constrained: any open status
/// may move to any other open status or to resolved; a resolved incident can
/// only be re-opened back to investigating. Same-state transitions are
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  Investigating,
  Identified,
  Monitoring,
  Resolved,
}

impl Status {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Investigating => "investigating",
      Self::Identified => "identified",
      Self::Monitoring => "monitoring",
      Self::Resolved => "resolved",
    }
  }

  /// The transition table. Same-state transitions are never legal.
  pub fn can_transition_to(self, to: Status) -> bool {
    if self == to {
      return false;
    }
    match self {
      Self::Resolved => to == Self::Investigating,
      _ => true,
    }
  }
}

impl std::fmt::Display for Status {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Incident ────────────────────────────────────────────────────────────────

/// The unit of collaborative response. The current-state projection; its
/// history lives in the append-only update log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
  pub incident_id: Uuid,
  pub title:       String,
  pub description: Option<String>,
  pub severity:    Severity,
  pub status:      Status,
  pub created_by:  Uuid,
  pub commander:   Uuid,
  /// Ordered set — duplicates are rejected at the store layer.
  pub assignees:   Vec<Uuid>,
  pub created_at:  DateTime<Utc>,
  /// Set the first time the incident enters `resolved`; sticky thereafter,
  /// even across re-opens.
  pub resolved_at: Option<DateTime<Utc>>,
}

/// Input to [`crate::store::IncidentStore::create_incident`].
/// Status, commander, and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewIncident {
  pub title:       String,
  pub description: Option<String>,
  pub severity:    Severity,
  pub created_by:  Uuid,
}
