use std::{
  collections::HashMap,
  sync::{Arc, Mutex},
};

use tokio::sync::broadcast;

use crate::target::TargetResponse;

/// Coalescing key: `(host, port, address, submitted_fingerprint)`. Two
/// concurrent requests with the same key share one verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub host:      String,
  pub port:      u16,
  pub address:   Option<String>,
  pub submitted: Option<String>,
}

/// Maps an in-flight `RequestKey` to a broadcast channel. The first request
/// for a key becomes the worker and performs the lookup/verify/upsert path;
/// every subsequent request for the same key before that resolves just
/// subscribes and waits. Mirrors `pages.py`'s `request_hash` dict keyed by
/// `request.key` and its `_check_request_hash` join-or-start decorator.
#[derive(Clone, Default)]
pub struct Coalescer {
  inflight: Arc<Mutex<HashMap<RequestKey, broadcast::Sender<TargetResponse>>>>,
}

pub enum Role {
  /// This caller is the sole worker for `key`; it must run the
  /// verification (in a task detached from its own request future, so a
  /// client disconnect can't cancel it) and call `Coalescer::resolve`. The
  /// receiver lets the worker await its own result the same way a joiner
  /// does.
  Worker(broadcast::Receiver<TargetResponse>),
  /// Another caller is already working on `key`; await `receiver` instead.
  Joiner(broadcast::Receiver<TargetResponse>),
}

impl Coalescer {
  pub fn new() -> Self { Self::default() }

  /// Atomically decide whether this request starts a new verification or
  /// joins an existing one for `key`.
  pub fn join_or_start(&self, key: RequestKey) -> Role {
    let mut inflight = self.inflight.lock().unwrap();
    if let Some(sender) = inflight.get(&key) {
      Role::Joiner(sender.subscribe())
    } else {
      let (sender, receiver) = broadcast::channel(1);
      inflight.insert(key, sender);
      Role::Worker(receiver)
    }
  }

  /// The worker calls this once its response is computed: broadcast to all
  /// joiners and remove the key so the next identical request starts fresh.
  pub fn resolve(&self, key: &RequestKey, response: TargetResponse) {
    let sender = { self.inflight.lock().unwrap().remove(key) };
    if let Some(sender) = sender {
      // No receivers is not an error: every waiter may have disconnected.
      let _ = sender.send(response);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key() -> RequestKey {
    RequestKey {
      host:      "example.com".to_string(),
      port:      443,
      address:   None,
      submitted: Some("AA:BB".to_string()),
    }
  }

  #[test]
  fn second_caller_for_same_key_joins() {
    let coalescer = Coalescer::new();
    assert!(matches!(coalescer.join_or_start(key()), Role::Worker(_)));
    assert!(matches!(coalescer.join_or_start(key()), Role::Joiner(_)));
  }

  #[test]
  fn key_is_freed_after_resolve() {
    let coalescer = Coalescer::new();
    assert!(matches!(coalescer.join_or_start(key()), Role::Worker(_)));
    coalescer.resolve(&key(), TargetResponse { code: 200, records: vec![] });
    assert!(matches!(coalescer.join_or_start(key()), Role::Worker(_)));
  }
}
