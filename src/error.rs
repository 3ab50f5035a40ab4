//! Error types for the convergence-notary crate.
//! - `StoreError`: failures from the fingerprint store
//! - `OptionsError`: failures parsing a verifier options string
//! - `NotaryError`: request-facing errors, mapped to the wire status codes
//!
//! It also provides conversion to HTTP responses for integration with the web framework.

use axum::{
  http::StatusCode,
  response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Errors from the fingerprint store.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("connection pool error: {0}")]
  Pool(#[from] r2d2::Error),
}

/// Errors parsing a verifier `-o/--backend-options` string.
#[derive(Debug, Error)]
pub enum OptionsError {
  #[error("unknown verifier option: {0}")]
  UnknownKey(String),

  #[error("invalid value for option {key}: {value}")]
  InvalidValue { key: String, value: String },

  #[error("unknown verifier backend: {0}")]
  UnknownBackend(String),
}

/// Errors surfaced to an HTTP client.
///
/// Malformed requests are 400, unsupported methods 405, storage/verifier
/// failures 503, and conclusive verifier mismatches are not errors at all (they are
/// ordinary signed 409 responses built by `target.rs`).
#[derive(Debug, Error)]
pub enum NotaryError {
  #[error("malformed request: {0}")]
  BadRequest(String),

  #[error("unsupported method")]
  MethodNotAllowed,

  #[error("storage failure: {0}")]
  Storage(#[from] StoreError),

  #[error("verification could not be completed: {0}")]
  VerificationFailed(String),
}

impl IntoResponse for NotaryError {
  fn into_response(self) -> Response {
    match self {
      bad_request @ NotaryError::BadRequest(_) =>
        (StatusCode::BAD_REQUEST, Html(format!("<html><body>{bad_request}</body></html>")))
          .into_response(),
      NotaryError::MethodNotAllowed =>
        (StatusCode::METHOD_NOT_ALLOWED, Html("<html><body>Unsupported method</body></html>"))
          .into_response(),
      storage_error @ NotaryError::Storage(_) => {
        error!("notary storage error: {storage_error:?}");
        (StatusCode::SERVICE_UNAVAILABLE, Html("<html><body>Storage unavailable</body></html>"))
          .into_response()
      },
      verify_error @ NotaryError::VerificationFailed(_) => {
        error!("notary verification error: {verify_error:?}");
        (StatusCode::SERVICE_UNAVAILABLE, Html("<html><body>Verification failed</body></html>"))
          .into_response()
      },
    }
  }
}
