//! End-to-end coverage of the fingerprint-coalescing path: many concurrent
//! requests for the same target must trigger exactly one verification and
//! all must observe the same signed result.

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};

use async_trait::async_trait;
use axum::{body::Bytes, extract::{Path, State}, http::Method};

use crate::{
  coalescer::Coalescer,
  listener::AppState,
  signer::ResponseSigner,
  store::FingerprintStore,
  target,
  verifier::{VerificationOutcome, Verifier},
};

/// Counts how many times `verify` actually ran and sleeps briefly so
/// concurrent callers have a real chance to race onto the same key.
struct CountingVerifier {
  calls: AtomicUsize,
}

#[async_trait]
impl Verifier for CountingVerifier {
  fn description(&self) -> &'static str { "CountingVerifier" }

  fn options_description(&self) -> &'static str { "no options" }

  async fn verify(
    &self,
    _host: &str,
    _port: u16,
    _address: Option<&str>,
    submitted_fingerprint: Option<&str>,
  ) -> eyre::Result<VerificationOutcome> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    Ok(VerificationOutcome {
      code:                 200,
      observed_fingerprint: Some(submitted_fingerprint.unwrap_or("AA:BB:CC").to_string()),
    })
  }
}

fn test_state(verifier: Arc<dyn Verifier>) -> Arc<AppState> {
  let db_path = std::env::temp_dir().join(format!("convergence-notary-test-{}.db", uuid::Uuid::new_v4()));
  let store = FingerprintStore::open(&db_path).unwrap();

  Arc::new(AppState { store, verifier, coalescer: Coalescer::new(), signer: ResponseSigner::for_tests() })
}

#[tokio::test]
async fn fifty_concurrent_requests_trigger_one_verification() {
  let verifier = Arc::new(CountingVerifier { calls: AtomicUsize::new(0) });
  let state = test_state(verifier.clone());

  let mut handles = Vec::new();
  for _ in 0..50 {
    let state = state.clone();
    handles.push(tokio::spawn(async move {
      target::handle(
        Method::POST,
        Path("coalesce.example+443".to_string()),
        State(state),
        Bytes::from_static(b"fingerprint=AA%3ABB%3ACC"),
      )
      .await
    }));
  }

  let mut saw_200 = 0;
  for handle in handles {
    let response = handle.await.unwrap();
    if response.status() == axum::http::StatusCode::OK {
      saw_200 += 1;
    }
  }

  assert_eq!(saw_200, 50);
  assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn worker_disconnect_does_not_cancel_verification_or_leak_the_key() {
  let verifier = Arc::new(CountingVerifier { calls: AtomicUsize::new(0) });
  let state = test_state(verifier.clone());

  let spawn_state = state.clone();
  let handle = tokio::spawn(async move {
    target::handle(
      Method::POST,
      Path("disconnect.example+443".to_string()),
      State(spawn_state),
      Bytes::from_static(b"fingerprint=AA%3ABB%3ACC"),
    )
    .await
  });

  // Give the worker branch time to spawn its detached verification task,
  // then simulate the client disconnecting before a response is ever sent.
  tokio::time::sleep(std::time::Duration::from_millis(5)).await;
  handle.abort();

  // The verification must still run to completion and the key must be
  // freed: a follow-up identical request must not hang forever on a
  // broadcast sender nobody will ever resolve.
  let followup = tokio::time::timeout(
    std::time::Duration::from_secs(2),
    target::handle(
      Method::POST,
      Path("disconnect.example+443".to_string()),
      State(state),
      Bytes::from_static(b"fingerprint=AA%3ABB%3ACC"),
    ),
  )
  .await
  .expect("follow-up request must not hang");

  assert_eq!(followup.status(), axum::http::StatusCode::OK);
}

#[tokio::test]
async fn second_request_is_a_cache_hit_with_no_further_verification() {
  let verifier = Arc::new(CountingVerifier { calls: AtomicUsize::new(0) });
  let state = test_state(verifier.clone());

  let first = target::handle(
    Method::POST,
    Path("cache.example+443".to_string()),
    State(state.clone()),
    Bytes::from_static(b"fingerprint=AA%3ABB%3ACC"),
  )
  .await;
  assert_eq!(first.status(), axum::http::StatusCode::OK);

  let second = target::handle(
    Method::GET,
    Path("cache.example+443".to_string()),
    State(state),
    Bytes::new(),
  )
  .await;
  assert_eq!(second.status(), axum::http::StatusCode::OK);
  assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
}
