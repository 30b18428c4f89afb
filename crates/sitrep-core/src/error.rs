//! Error types for `sitrep-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::{incident::Status, policy::Action, principal::Role};

/// Coarse classification of an [`Error`], used by transport layers to pick
/// an HTTP status code or a session error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  NotFound,
  Conflict,
  Validation,
  Forbidden,
  Internal,
}

impl ErrorKind {
  /// The machine-readable code carried in session `error` events.
  pub fn code(self) -> &'static str {
    match self {
      Self::NotFound => "not_found",
      Self::Conflict => "conflict",
      Self::Validation => "validation",
      Self::Forbidden => "forbidden",
      Self::Internal => "internal",
    }
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("incident not found: {0}")]
  IncidentNotFound(Uuid),

  #[error("update not found: {0}")]
  UpdateNotFound(Uuid),

  #[error("user not found: {0}")]
  UserNotFound(Uuid),

  #[error("email is already registered: {0}")]
  EmailTaken(String),

  #[error("user {0} is already assigned")]
  DuplicateAssignee(Uuid),

  #[error("user {0} is not assigned")]
  NotAssigned(Uuid),

  #[error("illegal status transition: {from} → {to}")]
  IllegalTransition { from: Status, to: Status },

  #[error("text is empty after trimming")]
  EmptyText,

  #[error("text is {len} characters; the maximum is {max}")]
  TextTooLong { len: usize, max: usize },

  #[error("update {0} is not an action item")]
  NotAnActionItem(Uuid),

  #[error("role {role} may not perform {action}")]
  Forbidden { role: Role, action: Action },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Implemented by store error types so transport layers can classify
/// failures (status code, session error code) without naming the backend.
pub trait Classify {
  fn kind(&self) -> ErrorKind;
}

impl Classify for Error {
  fn kind(&self) -> ErrorKind {
    Error::kind(self)
  }
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::IncidentNotFound(_)
      | Self::UpdateNotFound(_)
      | Self::UserNotFound(_) => ErrorKind::NotFound,
      Self::EmailTaken(_)
      | Self::DuplicateAssignee(_)
      | Self::NotAssigned(_)
      | Self::IllegalTransition { .. } => ErrorKind::Conflict,
      Self::EmptyText | Self::TextTooLong { .. } | Self::NotAnActionItem(_) => {
        ErrorKind::Validation
      }
      Self::Forbidden { .. } => ErrorKind::Forbidden,
      Self::Serialization(_) => ErrorKind::Internal,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
