use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise the global tracing subscriber. Level is controlled by
/// `RUST_LOG`, falling back to `info` for this crate and `warn` elsewhere.
pub fn init(verbose: bool) {
  let default_directive = if verbose { "info,convergence_notary=debug" } else { "warn,convergence_notary=info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

  tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}

/// A short random tag attached to a request's log lines, mirroring the
/// original notary's per-request tagged logger: 3 random bytes, URL-safe
/// base64, purely cosmetic for operators grepping logs.
pub fn request_tag() -> String {
  let mut bytes = [0u8; 3];
  rand::thread_rng().fill_bytes(&mut bytes);
  URL_SAFE_NO_PAD.encode(bytes)
}
