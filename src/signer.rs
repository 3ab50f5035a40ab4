use std::{fs, path::Path};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::{
  pkcs1v15::SigningKey,
  pkcs8::DecodePrivateKey,
  signature::{SignatureEncoding, Signer},
  RsaPrivateKey,
};
use sha1::Sha1;

use crate::store::FingerprintRecord;

/// Holds the notary's long-lived RSA key and signs canonical response
/// payloads with it. Loaded once at startup; no rotation, matching the
/// original notary's "one key for the process lifetime" design.
pub struct ResponseSigner {
  signing_key: SigningKey<Sha1>,
}

impl ResponseSigner {
  /// Load the private key from a PEM file. The same file may carry both
  /// the TLS server certificate and the private key; only the key section
  /// is used here.
  pub fn from_pem_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
    let pem = fs::read_to_string(path.as_ref())?;
    let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)
      .or_else(|_| rsa::pkcs1::DecodeRsaPrivateKey::from_pkcs1_pem(&pem))
      .map_err(|e| eyre::eyre!("failed to parse notary signing key: {e}"))?;
    Ok(Self { signing_key: SigningKey::<Sha1>::new(private_key) })
  }

  /// Sign the exact bytes of a canonical payload, returning base64.
  pub fn sign(&self, payload: &[u8]) -> String {
    let signature = self.signing_key.sign(payload);
    STANDARD.encode(signature.to_bytes())
  }

  #[cfg(test)]
  pub fn for_tests() -> Self {
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 512).expect("key generation");
    Self { signing_key: SigningKey::<Sha1>::new(private_key) }
  }
}

/// Serialize the `response` object of the wire document with a stable key
/// order (`timestamp` before `fingerprint`, `start` before `finish`),
/// byte-for-byte, independent of any JSON
/// library's default key ordering.
pub fn canonical_payload(records: &[FingerprintRecord]) -> String {
  let items: Vec<String> = records
    .iter()
    .map(|r| {
      format!(
        r#"{{"timestamp":{{"start":{},"finish":{}}},"fingerprint":{}}}"#,
        r.timestamp_start,
        r.timestamp_finish,
        serde_json::to_string(&r.fingerprint).expect("string serialization cannot fail")
      )
    })
    .collect();
  format!(r#"{{"fingerprintList":[{}]}}"#, items.join(","))
}

/// Build the full wire document: `{"signature": "...", "response": {...}}`.
pub fn signed_document(signer: &ResponseSigner, records: &[FingerprintRecord]) -> String {
  let payload = canonical_payload(records);
  let signature = signer.sign(payload.as_bytes());
  format!(r#"{{"signature":"{signature}","response":{payload}}}"#)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn canonical_payload_key_order() {
    let records = vec![FingerprintRecord {
      fingerprint:      "AA:BB:CC".to_string(),
      timestamp_start:  100,
      timestamp_finish: 200,
    }];
    let payload = canonical_payload(&records);
    assert_eq!(
      payload,
      r#"{"fingerprintList":[{"timestamp":{"start":100,"finish":200},"fingerprint":"AA:BB:CC"}]}"#
    );
  }

  #[test]
  fn canonical_payload_empty() {
    assert_eq!(canonical_payload(&[]), r#"{"fingerprintList":[]}"#);
  }
}
