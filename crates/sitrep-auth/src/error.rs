//! Error types for `sitrep-auth`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
  #[error("signing secret is {0} bytes; at least {min} are required", min = crate::MIN_SECRET_LEN)]
  WeakSecret(usize),

  #[error("malformed token")]
  Malformed,

  #[error("bad token signature")]
  BadSignature,

  #[error("token expired")]
  Expired,

  #[error("token encoding error: {0}")]
  Encoding(String),

  #[error("password hash error: {0}")]
  PasswordHash(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
