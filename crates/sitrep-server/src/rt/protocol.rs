//! Session protocol — typed inbound commands and outbound events.
//!
//! Both directions share the envelope `{"event": <string>, "data": <object>}`.
//! Parsing into a closed enum (rather than dispatching on strings) means an
//! unknown event or a malformed payload fails in one place, before any
//! handler runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitrep_core::{
  incident::{Incident, Status},
  principal::User,
  update::Update,
};
use uuid::Uuid;

use crate::rt::focus::FocusEntry;

/// The section of the incident view a focus cursor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusSection {
  Status,
  Severity,
  Description,
  Notes,
  Assignees,
  ActionItems,
  Commander,
}

// ─── Inbound ─────────────────────────────────────────────────────────────────

/// Client-to-server command.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
  /// Data is the incident id as a plain string.
  #[serde(rename = "incident:join")]
  Join(Uuid),

  #[serde(rename = "incident:leave")]
  Leave(Uuid),

  #[serde(rename = "presence:heartbeat")]
  Heartbeat,

  #[serde(rename = "focus:update", rename_all = "camelCase")]
  FocusUpdate {
    incident_id: Uuid,
    section:     FocusSection,
    #[serde(default)]
    field_id:    Option<String>,
  },

  #[serde(rename = "focus:clear", rename_all = "camelCase")]
  FocusClear { incident_id: Uuid },

  #[serde(rename = "incident:updateStatus", rename_all = "camelCase")]
  UpdateStatus { incident_id: Uuid, status: Status },

  #[serde(rename = "incident:addNote", rename_all = "camelCase")]
  AddNote { incident_id: Uuid, text: String },

  #[serde(rename = "incident:assign", rename_all = "camelCase")]
  Assign { incident_id: Uuid, target_user_id: Uuid },

  #[serde(rename = "incident:unassign", rename_all = "camelCase")]
  Unassign { incident_id: Uuid, target_user_id: Uuid },

  #[serde(rename = "incident:addActionItem", rename_all = "camelCase")]
  AddActionItem { incident_id: Uuid, text: String },

  #[serde(rename = "incident:toggleActionItem", rename_all = "camelCase")]
  ToggleActionItem {
    incident_id: Uuid,
    update_id:   Uuid,
    completed:   bool,
  },
}

// ─── Outbound ────────────────────────────────────────────────────────────────

/// A presence row decorated with principal metadata for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceInfo {
  pub user:           User,
  pub color:          &'static str,
  pub last_active_at: DateTime<Utc>,
}

/// Full incident projection plus the audit record the mutation produced.
/// Clients render from this payload directly instead of re-fetching.
#[derive(Debug, Clone, Serialize)]
pub struct MutationPayload {
  pub incident: Incident,
  pub update:   Update,
}

/// Server-to-client event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
  /// Unicast to a joining session: the full current list, including self.
  #[serde(rename = "presence:list", rename_all = "camelCase")]
  PresenceList {
    incident_id: Uuid,
    entries:     Vec<PresenceInfo>,
  },

  #[serde(rename = "presence:joined", rename_all = "camelCase")]
  PresenceJoined { incident_id: Uuid, entry: PresenceInfo },

  #[serde(rename = "presence:left", rename_all = "camelCase")]
  PresenceLeft { incident_id: Uuid, user_id: Uuid },

  #[serde(rename = "focus:list", rename_all = "camelCase")]
  FocusList {
    incident_id: Uuid,
    entries:     Vec<FocusEntry>,
  },

  #[serde(rename = "focus:updated")]
  FocusUpdated { entry: FocusEntry },

  #[serde(rename = "focus:cleared", rename_all = "camelCase")]
  FocusCleared { incident_id: Uuid, user_id: Uuid },

  #[serde(rename = "incident:updated")]
  IncidentUpdated(MutationPayload),

  #[serde(rename = "incident:noteAdded")]
  NoteAdded(MutationPayload),

  /// Covers both assignment directions; the audit record's `action`
  /// discriminates.
  #[serde(rename = "incident:assigned")]
  Assigned(MutationPayload),

  #[serde(rename = "incident:actionItemAdded")]
  ActionItemAdded(MutationPayload),

  #[serde(rename = "incident:actionItemToggled")]
  ActionItemToggled(MutationPayload),

  #[serde(rename = "error")]
  Error { code: String, message: String },
}
