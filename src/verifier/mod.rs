pub mod dns;
pub mod fixtures;
pub mod perspective;

use async_trait::async_trait;

use crate::error::OptionsError;

/// Result of one verification attempt. `code` is always one of 200, 409,
/// 503; `observed_fingerprint` is present whenever this notary actually saw
/// a fingerprint worth caching (which happens even on a 409, per the
/// mismatched-but-non-null-fingerprint caching behaviour documented in
/// `DESIGN.md`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
  pub code:                 u16,
  pub observed_fingerprint: Option<String>,
}

/// A verification backend: given a target, decide whether the fingerprint
/// it presents matches what was submitted (if anything was submitted at
/// all).
#[async_trait]
pub trait Verifier: Send + Sync {
  /// Short human-readable name, shown by the info endpoint as a fallback.
  fn description(&self) -> &'static str;

  /// Description of the `-o/--backend-options` string this backend accepts.
  fn options_description(&self) -> &'static str;

  /// Richer HTML description for the info endpoint.
  fn html_description(&self) -> String { format!("<html><body>{}</body></html>", self.description()) }

  /// Perform one verification. `address` pins the outbound connection to a
  /// specific IP; `submitted_fingerprint` is the fingerprint the client
  /// observed, if any (GET requests carry none).
  async fn verify(
    &self,
    host: &str,
    port: u16,
    address: Option<&str>,
    submitted_fingerprint: Option<&str>,
  ) -> eyre::Result<VerificationOutcome>;
}

/// Parse a Convergence-style options string: comma/whitespace separated
/// `key[=value]` or `-key` (to explicitly disable a boolean) tokens.
/// Mirrors `NetworkPerspectiveVerifier`'s options parser in the original.
pub fn parse_options(options: &str) -> Result<Vec<(String, Option<String>)>, OptionsError> {
  let mut parsed = Vec::new();
  for token in options.split([',', ' ', '\t']).filter(|t| !t.is_empty()) {
    if let Some(stripped) = token.strip_prefix('-') {
      parsed.push((stripped.to_string(), Some("false".to_string())));
    } else if let Some((key, value)) = token.split_once('=') {
      parsed.push((key.to_string(), Some(value.to_string())));
    } else {
      parsed.push((token.to_string(), None));
    }
  }
  Ok(parsed)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_bare_and_valued_and_disabled_keys() {
    let opts = parse_options("verify_ca, bind=10.0.0.1 -legacy").unwrap();
    assert_eq!(opts[0], ("verify_ca".to_string(), None));
    assert_eq!(opts[1], ("bind".to_string(), Some("10.0.0.1".to_string())));
    assert_eq!(opts[2], ("legacy".to_string(), Some("false".to_string())));
  }
}
