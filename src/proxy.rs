use tokio::{
  io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
  net::{TcpListener, TcpStream},
  task::JoinSet,
};
use tracing::{debug, error, info, warn};

const DENY_BODY: &str = "<html><body>403 Access Denied</body></html>";
const NOT_FOUND_BODY: &str = "Unable to connect to notary!";

/// Accept loop for the plain-HTTP proxy port: speaks just enough HTTP to
/// recognise `CONNECT` and tunnel it, per
/// `original_source/server/convergence/ConnectChannel.py`.
pub async fn serve(listener: TcpListener) {
  loop {
    match listener.accept().await {
      Ok((stream, peer)) => {
        debug!(%peer, "proxy channel connection accepted");
        tokio::spawn(async move {
          if let Err(err) = handle_connection(stream).await {
            warn!("proxy channel connection error: {err:#}");
          }
        });
      },
      Err(err) => error!("proxy channel accept error: {err:#}"),
    }
  }
}

struct ConnectRequest {
  method:         String,
  target:         String,
  notary_headers: Vec<String>,
}

async fn handle_connection(stream: TcpStream) -> eyre::Result<()> {
  let mut reader = BufReader::new(stream);
  let request = read_request(&mut reader).await?;

  if request.method != "CONNECT" {
    deny(&mut reader).await?;
    return Ok(());
  }

  let mut destinations = Vec::new();
  match parse_destination(&request.target) {
    Ok(host) => destinations.push(host),
    Err(()) => {
      deny(&mut reader).await?;
      return Ok(());
    },
  }
  for header in &request.notary_headers {
    match parse_destination(header) {
      Ok(host) => destinations.push(host),
      Err(()) => {
        deny(&mut reader).await?;
        return Ok(());
      },
    }
  }

  match race_connect(&destinations).await {
    Some((host, mut upstream)) => {
      let response = format!(
        "HTTP/1.0 200 Connection Established\r\nProxy-Agent: Convergence\r\nX-Convergence-Notary: \
         {host}\r\n\r\n"
      );
      reader.write_all(response.as_bytes()).await?;
      info!(host, "CONNECT tunnel established");
      tokio::io::copy_bidirectional(&mut reader, &mut upstream).await.ok();
    },
    None => {
      let response = format!(
        "HTTP/1.0 404 Not Found\r\nContent-Length: {}\r\n\r\n{}",
        NOT_FOUND_BODY.len(),
        NOT_FOUND_BODY
      );
      reader.write_all(response.as_bytes()).await?;
    },
  }

  Ok(())
}

async fn deny(reader: &mut BufReader<TcpStream>) -> eyre::Result<()> {
  let response = format!(
    "HTTP/1.0 403 Access Denied\r\nContent-Length: {}\r\n\r\n{}",
    DENY_BODY.len(),
    DENY_BODY
  );
  reader.write_all(response.as_bytes()).await?;
  Ok(())
}

async fn read_request(reader: &mut BufReader<TcpStream>) -> eyre::Result<ConnectRequest> {
  let mut request_line = String::new();
  reader.read_line(&mut request_line).await?;
  let mut parts = request_line.split_whitespace();
  let method = parts.next().unwrap_or("").to_string();
  let target = parts.next().unwrap_or("").to_string();

  let mut notary_headers = Vec::new();
  loop {
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 || line == "\r\n" || line == "\n" {
      break;
    }
    if let Some((name, value)) = line.split_once(':') {
      if name.trim().eq_ignore_ascii_case("x-convergence-notary") {
        notary_headers.push(value.trim().to_string());
      }
    }
  }

  Ok(ConnectRequest { method, target, notary_headers })
}

/// Accept `host:4242` and `host+4242`, with or without an explicit port for
/// headers (default 4242). Any other explicit port is rejected.
fn parse_destination(raw: &str) -> Result<String, ()> {
  let raw = raw.trim();
  if raw.is_empty() {
    return Err(());
  }
  if let Some((host, port)) = raw.split_once('+') {
    return require_port_4242(host, port);
  }
  if let Some((host, port)) = raw.rsplit_once(':') {
    return require_port_4242(host, port);
  }
  Ok(raw.to_string())
}

fn require_port_4242(host: &str, port: &str) -> Result<String, ()> {
  if host.is_empty() {
    return Err(());
  }
  let port: u16 = port.parse().map_err(|_| ())?;
  if port != 4242 {
    return Err(());
  }
  Ok(host.to_string())
}

/// Open one outbound connection per destination; the first to succeed is
/// the elected tunnel and the rest are cancelled. Mirrors
/// `NotaryConnectionFactory.buildProtocol`'s "first connected wins".
async fn race_connect(hosts: &[String]) -> Option<(String, TcpStream)> {
  let mut set = JoinSet::new();
  for host in hosts {
    let host = host.clone();
    set.spawn(async move { TcpStream::connect((host.as_str(), 4242)).await.map(|stream| (host, stream)) });
  }

  while let Some(result) = set.join_next().await {
    if let Ok(Ok((host, stream))) = result {
      set.abort_all();
      return Some((host, stream));
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_colon_form() {
    assert_eq!(parse_destination("peer.example:4242"), Ok("peer.example".to_string()));
  }

  #[test]
  fn accepts_plus_form() {
    assert_eq!(parse_destination("peer.example+4242"), Ok("peer.example".to_string()));
  }

  #[test]
  fn rejects_other_ports() {
    assert!(parse_destination("evil.example:22").is_err());
  }

  #[test]
  fn header_without_port_defaults_to_4242() {
    assert_eq!(parse_destination("peer.example"), Ok("peer.example".to_string()));
  }
}
