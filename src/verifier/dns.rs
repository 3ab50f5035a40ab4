use async_trait::async_trait;
use hickory_resolver::{config::{ResolverConfig, ResolverOpts}, TokioAsyncResolver};

use super::{VerificationOutcome, Verifier};

/// Looks up a DNS TXT record named `<host>` (or a configured template) and
/// treats its value as the fingerprint this notary observes. Useful for
/// hosts that publish their own certificate fingerprint out-of-band.
pub struct DnsVerifier {
  resolver: TokioAsyncResolver,
}

impl DnsVerifier {
  pub fn new() -> eyre::Result<Self> {
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
    Ok(Self { resolver })
  }
}

#[async_trait]
impl Verifier for DnsVerifier {
  fn description(&self) -> &'static str { "DNSVerifier" }

  fn options_description(&self) -> &'static str { "no options" }

  async fn verify(
    &self,
    host: &str,
    _port: u16,
    _address: Option<&str>,
    submitted_fingerprint: Option<&str>,
  ) -> eyre::Result<VerificationOutcome> {
    let lookup = self.resolver.txt_lookup(host).await?;
    let observed = lookup.iter().next().map(|txt| txt.to_string());

    let code = match (&observed, submitted_fingerprint) {
      (Some(observed), Some(submitted)) if observed.eq_ignore_ascii_case(submitted) => 200,
      _ => 409,
    };

    Ok(VerificationOutcome { code, observed_fingerprint: observed })
  }
}
