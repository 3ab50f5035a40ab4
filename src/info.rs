use std::sync::Arc;

use axum::{
  extract::State,
  http::Method,
  response::{Html, IntoResponse, Response},
};

use crate::{error::NotaryError, listener::AppState};

/// `GET /` renders the active verifier's description; any other method is
/// a 405, per `original_source/server/convergence/InfoPage.py`.
pub async fn handle(method: Method, State(state): State<Arc<AppState>>) -> Response {
  if method != Method::GET {
    return NotaryError::MethodNotAllowed.into_response();
  }
  Html(state.verifier.html_description()).into_response()
}
