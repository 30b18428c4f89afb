//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Both transports route through this type: HTTP responses carry
//! `{"error": <message>}` with a status code per kind; session `error`
//! events carry `{code, message}`. Internal failures are logged in full and
//! redacted on the wire.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use sitrep_core::{Classify, ErrorKind};
use thiserror::Error;

/// An error surfaced to a client.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("missing credentials")]
  AuthMissing,

  #[error("invalid credentials: {0}")]
  AuthInvalid(String),

  #[error("credentials expired")]
  AuthExpired,

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("{0}")]
  Validation(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("internal error: {0}")]
  Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Map a store/domain error onto the client-facing taxonomy by kind.
pub fn classify<E>(e: E) -> ApiError
where
  E: Classify + std::error::Error + Send + Sync + 'static,
{
  match e.kind() {
    ErrorKind::NotFound => ApiError::NotFound(e.to_string()),
    ErrorKind::Conflict => ApiError::Conflict(e.to_string()),
    ErrorKind::Validation => ApiError::Validation(e.to_string()),
    ErrorKind::Forbidden => ApiError::Forbidden(e.to_string()),
    ErrorKind::Internal => ApiError::Internal(Box::new(e)),
  }
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      Self::AuthMissing | Self::AuthInvalid(_) | Self::AuthExpired => {
        StatusCode::UNAUTHORIZED
      }
      Self::Forbidden(_) => StatusCode::FORBIDDEN,
      // Conflicts share 400 with validation failures on this API.
      Self::Validation(_) | Self::Conflict(_) => StatusCode::BAD_REQUEST,
      Self::NotFound(_) => StatusCode::NOT_FOUND,
      Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  /// Machine-readable code for session `error` events.
  pub fn code(&self) -> &'static str {
    match self {
      Self::AuthMissing | Self::AuthInvalid(_) | Self::AuthExpired => "auth",
      Self::Forbidden(_) => "forbidden",
      Self::Validation(_) => "validation",
      Self::NotFound(_) => "not_found",
      Self::Conflict(_) => "conflict",
      Self::Internal(_) => "internal",
    }
  }

  /// The human message a client may see; internal detail stays in the logs.
  pub fn public_message(&self) -> String {
    match self {
      Self::Internal(e) => {
        tracing::error!("internal error: {e}");
        "internal error".to_owned()
      }
      other => other.to_string(),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    (self.status(), Json(json!({ "error": self.public_message() })))
      .into_response()
  }
}
