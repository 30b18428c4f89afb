//! Authorization policy — a pure (role, action) table.
//!
//! The server is the sole authority; any client-side hint about what a role
//! can do is untrusted decoration.

use serde::{Deserialize, Serialize};

use crate::{Result, principal::Role};

/// The actions a command or endpoint can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
  IncidentCreate,
  IncidentUpdate,
  IncidentAssign,
  IncidentNote,
  IncidentActionItem,
  UserManage,
  Read,
}

impl Action {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::IncidentCreate => "incident.create",
      Self::IncidentUpdate => "incident.update",
      Self::IncidentAssign => "incident.assign",
      Self::IncidentNote => "incident.note",
      Self::IncidentActionItem => "incident.action_item",
      Self::UserManage => "user.manage",
      Self::Read => "read",
    }
  }
}

impl std::fmt::Display for Action {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Whether `role` may perform `action`.
pub fn allows(role: Role, action: Action) -> bool {
  match action {
    Action::Read => true,
    Action::UserManage => role == Role::Admin,
    _ => role.is_writer(),
  }
}

/// [`allows`], surfaced as a typed Forbidden error for handler pipelines.
pub fn authorize(role: Role, action: Action) -> Result<()> {
  if allows(role, action) {
    Ok(())
  } else {
    Err(crate::Error::Forbidden { role, action })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{Error, ErrorKind};

  const WRITES: [Action; 5] = [
    Action::IncidentCreate,
    Action::IncidentUpdate,
    Action::IncidentAssign,
    Action::IncidentNote,
    Action::IncidentActionItem,
  ];

  #[test]
  fn writers_write_viewers_do_not() {
    for action in WRITES {
      assert!(allows(Role::Admin, action));
      assert!(allows(Role::Responder, action));
      assert!(!allows(Role::Viewer, action));
    }
  }

  #[test]
  fn user_manage_is_admin_only() {
    assert!(allows(Role::Admin, Action::UserManage));
    assert!(!allows(Role::Responder, Action::UserManage));
    assert!(!allows(Role::Viewer, Action::UserManage));
  }

  #[test]
  fn every_role_reads() {
    for role in [Role::Admin, Role::Responder, Role::Viewer] {
      assert!(allows(role, Action::Read));
    }
  }

  #[test]
  fn authorize_surfaces_forbidden_kind() {
    let err = authorize(Role::Viewer, Action::IncidentNote).unwrap_err();
    assert!(matches!(err, Error::Forbidden { .. }));
    assert_eq!(err.kind(), ErrorKind::Forbidden);
  }
}
