use std::{
  net::{IpAddr, SocketAddr},
  sync::{Arc, Mutex},
  time::Duration,
};

use async_trait::async_trait;
use rustls::{
  client::{
    danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    WebPkiServerVerifier,
  },
  pki_types::{CertificateDer, ServerName, UnixTime},
  ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme,
};
use sha1::{Digest, Sha1};
use tokio::net::{TcpSocket, TcpStream};
use x509_parser::extensions::{GeneralName, ParsedExtension};

use super::{parse_options, VerificationOutcome, Verifier};
use crate::error::OptionsError;

/// Outbound-connection timeout. Not named in the core specification but
/// recommended by its design notes ("implementers SHOULD add an upper
/// bound... and fail verification as 503 on expiry").
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Default)]
struct Options {
  verify_ca: bool,
  bind:      Option<SocketAddr>,
}

fn parse(options: &str) -> Result<Options, OptionsError> {
  let mut parsed = Options::default();
  for (key, value) in parse_options(options)? {
    match key.as_str() {
      "verify_ca" => parsed.verify_ca = value.as_deref() != Some("false"),
      "bind" => {
        let value = value.ok_or_else(|| OptionsError::InvalidValue {
          key:   "bind".to_string(),
          value: String::new(),
        })?;
        let addr = if value.contains(':') {
          value.parse()
        } else {
          format!("{value}:0").parse()
        };
        parsed.bind =
          Some(addr.map_err(|_| OptionsError::InvalidValue { key: "bind".to_string(), value })?);
      },
      other => return Err(OptionsError::UnknownKey(other.to_string())),
    }
  }
  Ok(parsed)
}

/// Captures the leaf certificate presented during the handshake and always
/// reports it as verified. rustls offers no way to abort mid-handshake at
/// depth 0 and return anything other than accept/reject, so the handshake
/// is allowed to run to completion and the connection is dropped
/// immediately afterwards without exchanging application data.
#[derive(Debug)]
struct CaptureVerifier {
  captured: Arc<Mutex<Option<Vec<u8>>>>,
  webpki:   Option<Arc<WebPkiServerVerifier>>,
  ca_ok:    Arc<Mutex<bool>>,
}

impl CaptureVerifier {
  fn new(verify_ca: bool) -> Self {
    let webpki = if verify_ca {
      let mut roots = RootCertStore::empty();
      if let Ok(native) = rustls_native_certs::load_native_certs() {
        for cert in native {
          let _ = roots.add(cert);
        }
      }
      WebPkiServerVerifier::builder(Arc::new(roots)).build().ok()
    } else {
      None
    };
    Self { captured: Arc::new(Mutex::new(None)), webpki, ca_ok: Arc::new(Mutex::new(false)) }
  }
}

impl ServerCertVerifier for CaptureVerifier {
  fn verify_server_cert(
    &self,
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    server_name: &ServerName<'_>,
    ocsp_response: &[u8],
    now: UnixTime,
  ) -> Result<ServerCertVerified, TlsError> {
    *self.captured.lock().unwrap() = Some(end_entity.as_ref().to_vec());

    let ca_ok = match &self.webpki {
      Some(webpki) =>
        webpki.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now).is_ok(),
      None => true,
    };
    *self.ca_ok.lock().unwrap() = ca_ok;

    // Always accept: we only care about the certificate that was
    // presented, never about the rest of the session.
    Ok(ServerCertVerified::assertion())
  }

  fn verify_tls12_signature(
    &self,
    message: &[u8],
    cert: &CertificateDer<'_>,
    dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, TlsError> {
    rustls::crypto::verify_tls12_signature(
      message,
      cert,
      dss,
      &rustls::crypto::ring::default_provider().signature_verification_algorithms,
    )
  }

  fn verify_tls13_signature(
    &self,
    message: &[u8],
    cert: &CertificateDer<'_>,
    dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, TlsError> {
    rustls::crypto::verify_tls13_signature(
      message,
      cert,
      dss,
      &rustls::crypto::ring::default_provider().signature_verification_algorithms,
    )
  }

  fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
    vec![
      SignatureScheme::RSA_PKCS1_SHA256,
      SignatureScheme::RSA_PKCS1_SHA384,
      SignatureScheme::RSA_PKCS1_SHA512,
      SignatureScheme::ECDSA_NISTP256_SHA256,
      SignatureScheme::ECDSA_NISTP384_SHA384,
      SignatureScheme::ECDSA_NISTP521_SHA512,
      SignatureScheme::RSA_PSS_SHA256,
      SignatureScheme::RSA_PSS_SHA384,
      SignatureScheme::RSA_PSS_SHA512,
      SignatureScheme::ED25519,
    ]
  }
}

/// Performs an outbound TLS handshake for the sole purpose of observing
/// the certificate the target currently presents.
pub struct NetworkPerspectiveVerifier {
  options: Options,
}

impl NetworkPerspectiveVerifier {
  pub fn new(options_str: &str) -> Result<Self, OptionsError> { Ok(Self { options: parse(options_str)? }) }
}

#[async_trait]
impl Verifier for NetworkPerspectiveVerifier {
  fn description(&self) -> &'static str { "NetworkPerspectiveVerifier" }

  fn options_description(&self) -> &'static str {
    "verify_ca (bool, default off): validate CA chain and hostname/IP. bind=<ip[:port]>: source \
     address for outbound connections."
  }

  async fn verify(
    &self,
    host: &str,
    port: u16,
    address: Option<&str>,
    submitted_fingerprint: Option<&str>,
  ) -> eyre::Result<VerificationOutcome> {
    let connect_host = address.unwrap_or(host);

    let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, self.handshake(connect_host, port, host));
    let (leaf, ca_ok) = handshake.await.map_err(|_| eyre::eyre!("handshake timed out"))??;

    let mut observed_fp = Some(fingerprint(&leaf));

    if self.options.verify_ca {
      if !ca_ok {
        observed_fp = None;
      } else if !match_x509(&leaf, host, address) {
        observed_fp = None;
      }
    }

    let code = match (&observed_fp, submitted_fingerprint) {
      (Some(observed), Some(submitted)) if observed.eq_ignore_ascii_case(submitted) => 200,
      _ => 409,
    };

    Ok(VerificationOutcome { code, observed_fingerprint: observed_fp })
  }
}

impl NetworkPerspectiveVerifier {
  async fn handshake(&self, connect_host: &str, port: u16, sni_host: &str) -> eyre::Result<(Vec<u8>, bool)> {
    let tcp_stream = self.connect(connect_host, port).await?;

    let verifier = Arc::new(CaptureVerifier::new(self.options.verify_ca));
    let mut client_config = ClientConfig::builder()
      .dangerous()
      .with_custom_certificate_verifier(verifier.clone())
      .with_no_client_auth();
    client_config.alpn_protocols.clear();

    // `ServerName::try_from` parses `sni_host` as an IP literal when
    // possible and a DNS name otherwise; rustls only emits the SNI
    // extension for the DNS-name variant, which gives us "SNI equal to
    // host only if host is not a dotted-quad literal" for free.
    let server_name = ServerName::try_from(sni_host.to_string())
      .map_err(|_| eyre::eyre!("invalid server name: {sni_host}"))?;
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));

    // A handshake failure here (e.g. the peer refuses to negotiate at all)
    // is a 503, not a 409: we never reached a certificate to inspect.
    let tls_stream = connector.connect(server_name, tcp_stream).await?;
    drop(tls_stream);

    let leaf = verifier.captured.lock().unwrap().clone();
    let ca_ok = *verifier.ca_ok.lock().unwrap();
    leaf.map(|leaf| (leaf, ca_ok)).ok_or_else(|| eyre::eyre!("no certificate observed"))
  }

  async fn connect(&self, host: &str, port: u16) -> eyre::Result<TcpStream> {
    if let Some(bind) = self.options.bind {
      let socket = match bind {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
      };
      socket.bind(bind)?;
      let target: SocketAddr = resolve_one(host, port)?;
      Ok(socket.connect(target).await?)
    } else {
      Ok(TcpStream::connect((host, port)).await?)
    }
  }
}

fn resolve_one(host: &str, port: u16) -> eyre::Result<SocketAddr> {
  if let Ok(ip) = host.parse::<IpAddr>() {
    return Ok(SocketAddr::new(ip, port));
  }
  use std::net::ToSocketAddrs;
  (host, port).to_socket_addrs()?.next().ok_or_else(|| eyre::eyre!("could not resolve {host}"))
}

/// SHA-1 fingerprint of DER-encoded certificate bytes, uppercase hex,
/// colon-separated.
fn fingerprint(der: &[u8]) -> String {
  let digest = Sha1::digest(der);
  digest.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(":")
}

/// Match a leaf certificate's `subjectAltName` (or, absent any SAN,
/// `commonName`) against `host` (DNS wildcard rules) and/or `address`
/// (dotted-quad equality). Ported from `_dnsname_to_pat`/`match_x509`.
fn match_x509(der: &[u8], host: &str, address: Option<&str>) -> bool {
  let Ok((_, cert)) = x509_parser::certificate::X509Certificate::from_der(der) else {
    return false;
  };

  let mut saw_san = false;
  let mut matched = false;

  if let Ok(Some(extension)) = cert.subject_alternative_name() {
    if let ParsedExtension::SubjectAlternativeName(san) = extension.parsed_extension() {
      for name in &san.general_names {
        match name {
          GeneralName::DNSName(dns) => {
            saw_san = true;
            if dns_pattern_matches(dns, host) {
              matched = true;
            }
          },
          GeneralName::IPAddress(bytes) => {
            saw_san = true;
            if let Some(address) = address {
              if let Ok(octets) = dotted_quad_octets(address) {
                if bytes.len() == 4 && bytes == octets {
                  matched = true;
                }
              }
            }
          },
          _ => {},
        }
      }
    }
  }

  if !saw_san {
    if let Some(cn) =
      cert.subject().iter_common_name().next().and_then(|attr| attr.as_str().ok())
    {
      matched = dns_pattern_matches(cn, host);
    }
  }

  matched
}

/// `host` must not be a dotted-quad literal per §4.3's IPv6/IP exclusion for
/// DNS-name matching; callers pass whatever `host` they were given and this
/// function simply fails to match IP-literal hosts against DNS patterns,
/// which is the desired behaviour (IP literals are matched via `IPAddress`
/// SAN entries instead, see `match_x509` above).
fn dns_pattern_matches(pattern: &str, hostname: &str) -> bool {
  if hostname.contains(':') {
    return false; // IPv6 explicitly unsupported.
  }
  let pattern = pattern.to_ascii_lowercase();
  let hostname = hostname.to_ascii_lowercase();
  let pattern_labels: Vec<&str> = pattern.split('.').collect();
  let host_labels: Vec<&str> = hostname.split('.').collect();
  if pattern_labels.len() != host_labels.len() {
    return false;
  }
  pattern_labels.iter().zip(host_labels.iter()).all(|(p, h)| label_matches(p, h))
}

fn label_matches(pattern_label: &str, host_label: &str) -> bool {
  if pattern_label == "*" {
    return !host_label.is_empty();
  }
  if !pattern_label.contains('*') {
    return pattern_label == host_label;
  }
  let parts: Vec<&str> = pattern_label.split('*').collect();
  let mut remaining = host_label;

  if let Some(first) = parts.first() {
    if !remaining.starts_with(first) {
      return false;
    }
    remaining = &remaining[first.len()..];
  }
  if let Some(last) = parts.last() {
    if parts.len() > 1 {
      if !remaining.ends_with(last) {
        return false;
      }
      remaining = &remaining[..remaining.len() - last.len()];
    }
  }
  for middle in &parts[1..parts.len().saturating_sub(1)] {
    if middle.is_empty() {
      continue;
    }
    match remaining.find(middle) {
      Some(idx) => remaining = &remaining[idx + middle.len()..],
      None => return false,
    }
  }
  true
}

fn dotted_quad_octets(address: &str) -> Result<[u8; 4], ()> {
  if address.contains(':') {
    return Err(()); // IPv6 explicitly unsupported.
  }
  let parts: Vec<&str> = address.split('.').collect();
  if parts.len() != 4 {
    return Err(());
  }
  let mut octets = [0u8; 4];
  for (i, part) in parts.iter().enumerate() {
    octets[i] = part.parse::<u8>().map_err(|_| ())?;
  }
  Ok(octets)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn options_default_is_verify_ca_off() {
    let opts = parse("").unwrap();
    assert!(!opts.verify_ca);
    assert!(opts.bind.is_none());
  }

  #[test]
  fn options_parse_verify_ca_and_bind() {
    let opts = parse("verify_ca,bind=10.0.0.1").unwrap();
    assert!(opts.verify_ca);
    assert_eq!(opts.bind.unwrap().ip().to_string(), "10.0.0.1");
  }

  #[test]
  fn lone_star_matches_one_label() {
    assert!(dns_pattern_matches("*.example.com", "a.example.com"));
    assert!(!dns_pattern_matches("*.example.com", "example.com"));
    assert!(!dns_pattern_matches("*.example.com", "a.b.example.com"));
  }

  #[test]
  fn embedded_star_matches_substring() {
    assert!(dns_pattern_matches("foo*.example.com", "foobar.example.com"));
    assert!(dns_pattern_matches("foo*.example.com", "foo.example.com"));
    assert!(!dns_pattern_matches("foo*.example.com", "barfoo.example.com"));
  }

  #[test]
  fn ipv6_addresses_never_match() {
    assert!(!dns_pattern_matches("*.example.com", "::1"));
  }

  #[test]
  fn fingerprint_is_colon_separated_uppercase_hex() {
    let fp = fingerprint(b"hello");
    assert!(fp.split(':').all(|s| s.len() == 2 && s.chars().all(|c| c.is_ascii_hexdigit())));
    assert_eq!(fp, fp.to_uppercase());
  }
}
