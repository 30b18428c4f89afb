//! Error type for `sitrep-store-sqlite`.

use sitrep_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Domain-rule failures (not found, conflicts, validation) surface as the
  /// core error so transport layers can classify them by kind.
  #[error(transparent)]
  Core(#[from] sitrep_core::Error),

  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored enum string (role, severity, status) that no variant matches.
  #[error("column decode error: {0}")]
  Decode(String),
}

impl sitrep_core::Classify for Error {
  fn kind(&self) -> ErrorKind {
    match self {
      Self::Core(e) => e.kind(),
      _ => ErrorKind::Internal,
    }
  }
}

/// Domain errors cross the `conn.call` boundary boxed inside
/// [`tokio_rusqlite::Error::Other`]; unwrap them back here so callers see
/// the typed error instead of an opaque database failure.
impl From<tokio_rusqlite::Error> for Error {
  fn from(e: tokio_rusqlite::Error) -> Self {
    match e {
      tokio_rusqlite::Error::Other(boxed) => match boxed.downcast::<Error>() {
        Ok(err) => *err,
        Err(other) => Error::Database(tokio_rusqlite::Error::Other(other)),
      },
      other => Error::Database(other),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
