//! Update types — the append-only audit log of an incident.
//!
//! An update is an immutable record of one accepted mutation. The single
//! exception is the `completed` flag of an action item, which flips via a
//! dedicated command; no other stored field is ever rewritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, incident::Status};

/// Maximum note / action-item text length, counted after trimming.
pub const MAX_TEXT_LEN: usize = 2000;

/// Trim `raw` and enforce 1..=[`MAX_TEXT_LEN`] characters.
pub fn clean_text(raw: &str) -> Result<String> {
  let text = raw.trim();
  if text.is_empty() {
    return Err(crate::Error::EmptyText);
  }
  let len = text.chars().count();
  if len > MAX_TEXT_LEN {
    return Err(crate::Error::TextTooLong { len, max: MAX_TEXT_LEN });
  }
  Ok(text.to_owned())
}

// ─── Content ─────────────────────────────────────────────────────────────────

/// Direction of an assignment change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentAction {
  Assigned,
  Unassigned,
}

/// The typed payload of an update. The variant name serves as the `kind`
/// discriminant stored in the database and sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum UpdateContent {
  /// `previous_status` is `None` only on an incident's seed record.
  #[serde(rename_all = "camelCase")]
  StatusChange {
    previous_status: Option<Status>,
    new_status:      Status,
  },

  #[serde(rename_all = "camelCase")]
  Assignment {
    action:         AssignmentAction,
    target_user_id: Uuid,
  },

  Note { text: String },

  #[serde(rename_all = "camelCase")]
  ActionItem { text: String, completed: bool },
}

impl UpdateContent {
  /// The discriminant string stored in the `kind` column.
  /// Must match the `rename_all = "snake_case"` serde tags above.
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::StatusChange { .. } => "status_change",
      Self::Assignment { .. } => "assignment",
      Self::Note { .. } => "note",
      Self::ActionItem { .. } => "action_item",
    }
  }

  /// Serialise the inner payload (without the kind tag) for the
  /// `content_json` database column.
  pub fn to_json(&self) -> Result<serde_json::Value> {
    // The full serialised form is `{"kind": "...", "content": <payload>}`.
    // We want only the payload.
    let full = serde_json::to_value(self)?;
    Ok(full.get("content").cloned().unwrap_or(serde_json::Value::Null))
  }

  /// Deserialise from the discriminant string and JSON payload stored in the
  /// database.
  pub fn from_parts(
    discriminant: &str,
    content: serde_json::Value,
  ) -> Result<Self> {
    let wrapped =
      serde_json::json!({ "kind": discriminant, "content": content });
    Ok(serde_json::from_value(wrapped)?)
  }
}

// ─── Update ──────────────────────────────────────────────────────────────────

/// One record in an incident's audit log. Ordered by `created_at`, ties
/// broken by `update_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
  pub update_id:   Uuid,
  pub incident_id: Uuid,
  pub author_id:   Uuid,
  pub created_at:  DateTime<Utc>,
  #[serde(flatten)]
  pub content:     UpdateContent,
}
