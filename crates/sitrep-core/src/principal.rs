//! Principals — the authenticated operators of the system.
//!
//! A principal holds only identity metadata and a role. Password material is
//! handled by the store and the auth crate; it never appears on this type and
//! is therefore never serialized to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a principal is allowed to do. Writers are admins and responders;
/// viewers receive data but every write command fails fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Admin,
  Responder,
  Viewer,
}

impl Role {
  pub fn is_writer(self) -> bool {
    matches!(self, Self::Admin | Self::Responder)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Admin => "admin",
      Self::Responder => "responder",
      Self::Viewer => "viewer",
    }
  }
}

impl std::fmt::Display for Role {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An authenticated operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub user_id:    Uuid,
  pub name:       String,
  pub email:      String,
  pub role:       Role,
  pub created_at: DateTime<Utc>,
}

/// Input to [`crate::store::IncidentStore::create_user`].
/// `password_hash` is a PHC string produced by the auth crate; the store
/// never sees the plaintext password.
#[derive(Debug, Clone)]
pub struct NewUser {
  pub name:          String,
  pub email:         String,
  pub password_hash: String,
  pub role:          Role,
}
