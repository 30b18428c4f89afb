//! Encoding and decoding helpers between Rust domain types and the
//! plain-text representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Update content is stored
//! as compact JSON next to its kind discriminant. UUIDs are stored as
//! hyphenated lowercase strings.

use chrono::{DateTime, Utc};
use sitrep_core::{
  incident::{Incident, Severity, Status},
  presence::PresenceEntry,
  principal::{Role, User},
  update::{Update, UpdateContent},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Role ────────────────────────────────────────────────────────────────────

pub fn encode_role(r: Role) -> &'static str { r.as_str() }

pub fn decode_role(s: &str) -> Result<Role> {
  match s {
    "admin" => Ok(Role::Admin),
    "responder" => Ok(Role::Responder),
    "viewer" => Ok(Role::Viewer),
    other => Err(Error::Decode(format!("unknown role: {other:?}"))),
  }
}

// ─── Severity ────────────────────────────────────────────────────────────────

pub fn encode_severity(s: Severity) -> &'static str { s.as_str() }

pub fn decode_severity(s: &str) -> Result<Severity> {
  match s {
    "critical" => Ok(Severity::Critical),
    "high" => Ok(Severity::High),
    "medium" => Ok(Severity::Medium),
    "low" => Ok(Severity::Low),
    other => Err(Error::Decode(format!("unknown severity: {other:?}"))),
  }
}

// ─── Status ──────────────────────────────────────────────────────────────────

pub fn encode_status(s: Status) -> &'static str { s.as_str() }

pub fn decode_status(s: &str) -> Result<Status> {
  match s {
    "investigating" => Ok(Status::Investigating),
    "identified" => Ok(Status::Identified),
    "monitoring" => Ok(Status::Monitoring),
    "resolved" => Ok(Status::Resolved),
    other => Err(Error::Decode(format!("unknown status: {other:?}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `users` row (without the hash column).
pub struct RawUser {
  pub user_id:    String,
  pub name:       String,
  pub email:      String,
  pub role:       String,
  pub created_at: String,
}

impl RawUser {
  pub fn into_user(self) -> Result<User> {
    Ok(User {
      user_id:    decode_uuid(&self.user_id)?,
      name:       self.name,
      email:      self.email,
      role:       decode_role(&self.role)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from an `incidents` row. Assignees live in
/// their own table and are passed in separately.
pub struct RawIncident {
  pub incident_id: String,
  pub title:       String,
  pub description: Option<String>,
  pub severity:    String,
  pub status:      String,
  pub created_by:  String,
  pub commander:   String,
  pub created_at:  String,
  pub resolved_at: Option<String>,
}

impl RawIncident {
  pub fn into_incident(self, assignees: Vec<String>) -> Result<Incident> {
    Ok(Incident {
      incident_id: decode_uuid(&self.incident_id)?,
      title:       self.title,
      description: self.description,
      severity:    decode_severity(&self.severity)?,
      status:      decode_status(&self.status)?,
      created_by:  decode_uuid(&self.created_by)?,
      commander:   decode_uuid(&self.commander)?,
      assignees:   assignees
        .iter()
        .map(|s| decode_uuid(s))
        .collect::<Result<_>>()?,
      created_at:  decode_dt(&self.created_at)?,
      resolved_at: self.resolved_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// Raw strings read directly from an `updates` row.
pub struct RawUpdate {
  pub update_id:    String,
  pub incident_id:  String,
  pub author_id:    String,
  pub kind:         String,
  pub content_json: String,
  pub created_at:   String,
}

impl RawUpdate {
  pub fn into_update(self) -> Result<Update> {
    let content_json: serde_json::Value =
      serde_json::from_str(&self.content_json)?;
    let content = UpdateContent::from_parts(&self.kind, content_json)?;
    Ok(Update {
      update_id:   decode_uuid(&self.update_id)?,
      incident_id: decode_uuid(&self.incident_id)?,
      author_id:   decode_uuid(&self.author_id)?,
      created_at:  decode_dt(&self.created_at)?,
      content,
    })
  }
}

/// Raw strings read directly from a `presence` row.
pub struct RawPresence {
  pub user_id:        String,
  pub incident_id:    String,
  pub session_id:     String,
  pub last_active_at: String,
}

impl RawPresence {
  pub fn into_entry(self) -> Result<PresenceEntry> {
    Ok(PresenceEntry {
      user_id:        decode_uuid(&self.user_id)?,
      incident_id:    decode_uuid(&self.incident_id)?,
      session_id:     decode_uuid(&self.session_id)?,
      last_active_at: decode_dt(&self.last_active_at)?,
    })
  }
}
