use async_trait::async_trait;

use super::{VerificationOutcome, Verifier};

/// Test fixture: every verification conclusively matches, echoing back
/// whatever fingerprint the client submitted.
pub struct AlwaysTrueVerifier;

#[async_trait]
impl Verifier for AlwaysTrueVerifier {
  fn description(&self) -> &'static str { "AlwaysTrueVerifier" }

  fn options_description(&self) -> &'static str { "no options" }

  async fn verify(
    &self,
    _host: &str,
    _port: u16,
    _address: Option<&str>,
    submitted_fingerprint: Option<&str>,
  ) -> eyre::Result<VerificationOutcome> {
    Ok(VerificationOutcome { code: 200, observed_fingerprint: submitted_fingerprint.map(String::from) })
  }
}

/// Test fixture: every verification conclusively mismatches with no
/// observed fingerprint worth caching.
pub struct AlwaysFalseVerifier;

#[async_trait]
impl Verifier for AlwaysFalseVerifier {
  fn description(&self) -> &'static str { "AlwaysFalseVerifier" }

  fn options_description(&self) -> &'static str { "no options" }

  async fn verify(
    &self,
    _host: &str,
    _port: u16,
    _address: Option<&str>,
    _submitted_fingerprint: Option<&str>,
  ) -> eyre::Result<VerificationOutcome> {
    Ok(VerificationOutcome { code: 409, observed_fingerprint: None })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn always_true_echoes_submitted() {
    let outcome = AlwaysTrueVerifier.verify("example.com", 443, None, Some("AA:BB")).await.unwrap();
    assert_eq!(outcome.code, 200);
    assert_eq!(outcome.observed_fingerprint.as_deref(), Some("AA:BB"));
  }

  #[tokio::test]
  async fn always_false_has_no_observed_fingerprint() {
    let outcome = AlwaysFalseVerifier.verify("example.com", 443, None, Some("AA:BB")).await.unwrap();
    assert_eq!(outcome.code, 409);
    assert_eq!(outcome.observed_fingerprint, None);
  }
}
