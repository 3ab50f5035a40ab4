use std::sync::Arc;

use axum::{
  body::Bytes,
  extract::{Path, State},
  http::Method,
  response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::{
  coalescer::{Role, RequestKey},
  error::NotaryError,
  listener::AppState,
  store::FingerprintRecord,
};

/// The outcome shared across every coalesced waiter for one `RequestKey`:
/// a status code and the record set to render (possibly empty).
#[derive(Debug, Clone)]
pub struct TargetResponse {
  pub code:    u16,
  pub records: Vec<FingerprintRecord>,
}

/// `GET|POST /target/<host>+<port>[/<address>]`.
pub async fn handle(
  method: Method,
  Path(rest): Path<String>,
  State(state): State<Arc<AppState>>,
  body: Bytes,
) -> Response {
  let tag = crate::logging::request_tag();

  let (host, port, address) = match parse_target(&rest) {
    Ok(parsed) => parsed,
    Err(message) => return NotaryError::BadRequest(message).into_response(),
  };

  let submitted_fingerprint = match method {
    Method::GET => None,
    Method::POST => match parse_fingerprint_form(&body) {
      Ok(fingerprint) => fingerprint,
      Err(message) => return NotaryError::BadRequest(message).into_response(),
    },
    _ => return NotaryError::MethodNotAllowed.into_response(),
  };

  if method == Method::POST && submitted_fingerprint.is_none() {
    return NotaryError::BadRequest("missing fingerprint".to_string()).into_response();
  }

  let key = RequestKey {
    host: host.clone(),
    port,
    address: address.clone(),
    submitted: submitted_fingerprint.clone(),
  };

  info!(tag, host, port, "target request");

  let mut receiver = match state.coalescer.join_or_start(key.clone()) {
    Role::Worker(receiver) => {
      // Run on a task detached from this handler's own future: if this
      // request's client disconnects, axum drops this future, but the
      // verification (and any other waiters coalesced onto it) must run
      // to completion and the key must still be freed afterwards.
      let spawn_state = state.clone();
      let spawn_key = key.clone();
      let host = host.clone();
      let address = address.clone();
      let submitted_fingerprint = submitted_fingerprint.clone();
      let tag = tag.clone();
      tokio::spawn(async move {
        let response =
          compute(&spawn_state, &host, port, address.as_deref(), submitted_fingerprint.as_deref())
            .await
            .unwrap_or_else(|err| {
              warn!(tag, "target computation failed: {err:#}");
              TargetResponse { code: 503, records: vec![] }
            });
        spawn_state.coalescer.resolve(&spawn_key, response);
      });
      receiver
    },
    Role::Joiner(receiver) => receiver,
  };

  let target_response = match receiver.recv().await {
    Ok(response) => response,
    Err(_) => {
      // The worker task panicked without resolving; fail closed.
      return NotaryError::VerificationFailed("worker disappeared".to_string()).into_response();
    },
  };

  render(&state, target_response)
}

/// The actual lookup/verify/upsert algorithm, run exactly once per
/// `RequestKey` no matter how many requests are coalesced onto it.
async fn compute(
  state: &AppState,
  host: &str,
  port: u16,
  address: Option<&str>,
  submitted_fingerprint: Option<&str>,
) -> eyre::Result<TargetResponse> {
  let records = state.store.get_records(host, port)?;

  let cache_hit = !records.is_empty()
    && match submitted_fingerprint {
      None => true,
      Some(submitted) => records.iter().any(|r| r.fingerprint.eq_ignore_ascii_case(submitted)),
    };

  if cache_hit {
    return Ok(TargetResponse { code: 200, records });
  }

  let outcome = state.verifier.verify(host, port, address, submitted_fingerprint).await?;

  match outcome.observed_fingerprint {
    None => Ok(TargetResponse { code: outcome.code, records: vec![] }),
    Some(observed) => {
      let now = now_unix();
      let records = state.store.upsert(host, port, &observed, now)?;
      Ok(TargetResponse { code: outcome.code, records })
    },
  }
}

fn render(state: &AppState, response: TargetResponse) -> Response {
  match response.code {
    200 | 409 => {
      let document = crate::signer::signed_document(&state.signer, &response.records);
      (
        axum::http::StatusCode::from_u16(response.code).unwrap(),
        [("content-type", "application/json")],
        document,
      )
        .into_response()
    },
    _ => NotaryError::VerificationFailed("verification could not be completed".to_string())
      .into_response(),
  }
}

/// Parse the `<host>+<port>[/<address>]` grammar. `+` is required; `:` is
/// reserved for the CONNECT grammar.
fn parse_target(rest: &str) -> Result<(String, u16, Option<String>), String> {
  let mut segments = rest.splitn(2, '/');
  let target = segments.next().unwrap_or("");
  let address = segments.next().filter(|s| !s.is_empty()).map(String::from);

  let (host, port) =
    target.split_once('+').ok_or_else(|| format!("malformed target '{target}': expected host+port"))?;
  if host.is_empty() {
    return Err("malformed target: empty host".to_string());
  }
  let port: u16 = port.parse().map_err(|_| format!("malformed target: invalid port '{port}'"))?;

  Ok((host.to_string(), port, address))
}

/// Parse `application/x-www-form-urlencoded` body for `fingerprint=<hex>`.
fn parse_fingerprint_form(body: &Bytes) -> Result<Option<String>, String> {
  let body = std::str::from_utf8(body).map_err(|_| "request body is not valid UTF-8".to_string())?;
  for pair in body.split('&') {
    if let Some((key, value)) = pair.split_once('=') {
      if key == "fingerprint" {
        let decoded = form_urldecode(value);
        if decoded.is_empty() {
          return Err("empty fingerprint".to_string());
        }
        return Ok(Some(decoded));
      }
    }
  }
  Ok(None)
}

fn form_urldecode(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  let mut chars = value.chars();
  while let Some(c) = chars.next() {
    match c {
      '+' => out.push(' '),
      '%' => {
        let hi = chars.next();
        let lo = chars.next();
        if let (Some(hi), Some(lo)) = (hi, lo) {
          if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
            out.push(byte as char);
            continue;
          }
        }
        out.push('%');
      },
      other => out.push(other),
    }
  }
  out
}

fn now_unix() -> i64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_secs() as i64)
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_host_port() {
    let (host, port, address) = parse_target("example.com+443").unwrap();
    assert_eq!(host, "example.com");
    assert_eq!(port, 443);
    assert_eq!(address, None);
  }

  #[test]
  fn parses_host_port_address() {
    let (host, port, address) = parse_target("example.com+443/93.184.216.34").unwrap();
    assert_eq!(host, "example.com");
    assert_eq!(port, 443);
    assert_eq!(address.as_deref(), Some("93.184.216.34"));
  }

  #[test]
  fn rejects_missing_plus() {
    assert!(parse_target("example.com:443").is_err());
  }

  #[test]
  fn form_parses_fingerprint() {
    let body = Bytes::from_static(b"fingerprint=AA%3ABB%3ACC");
    assert_eq!(parse_fingerprint_form(&body).unwrap().as_deref(), Some("AA:BB:CC"));
  }

  #[test]
  fn form_without_fingerprint_is_none() {
    let body = Bytes::from_static(b"other=1");
    assert_eq!(parse_fingerprint_form(&body).unwrap(), None);
  }
}
