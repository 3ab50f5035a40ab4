use std::{fs, io, path::Path, sync::Arc};

use axum::{routing::get, Router};
use hyper::{body::Incoming, server::conn::http1};
use hyper_util::rt::TokioIo;
use rustls::{
  pki_types::{CertificateDer, PrivateKeyDer},
  ServerConfig,
};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower_service::Service;
use tracing::{error, info};

use crate::{coalescer::Coalescer, config::Config, info, proxy, signer::ResponseSigner, store::FingerprintStore, target, verifier::Verifier};

/// Process-wide state shared by every request handler.
pub struct AppState {
  pub store:     FingerprintStore,
  pub verifier:  Arc<dyn Verifier>,
  pub coalescer: Coalescer,
  pub signer:    ResponseSigner,
}

fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/", get(info::handle))
    .route("/target/*rest", get(target::handle).post(target::handle))
    .with_state(state)
}

/// Bind and run all three listeners: the plain proxy port, the TLS port,
/// and (unless disabled) the plaintext mirror of the TLS port at the
/// load-bearing 4242.
pub async fn run(config: &Config, state: Arc<AppState>) -> eyre::Result<()> {
  let app = router(state);

  let proxy_listener = TcpListener::bind((config.interface.as_str(), config.proxy_port)).await?;
  info!("CONNECT proxy channel listening on {}:{}", config.interface, config.proxy_port);
  tokio::spawn(proxy::serve(proxy_listener));

  let certs = load_certs(config.cert_path())?;
  let key = load_private_key(config.cert_key_path())?;
  let mut server_config =
    ServerConfig::builder().with_no_client_auth().with_single_cert(certs, key)?;
  server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
  let tls_acceptor = TlsAcceptor::from(Arc::new(server_config));

  let tls_listener = TcpListener::bind((config.interface.as_str(), config.tls_port)).await?;
  info!("TLS listener on {}:{}", config.interface, config.tls_port);
  tokio::spawn(serve_tls(tls_listener, tls_acceptor, app.clone()));

  if !config.no_https {
    let plain_listener =
      TcpListener::bind((config.interface.as_str(), config.tls_port_proxied)).await?;
    info!("plaintext mirror listener on {}:{}", config.interface, config.tls_port_proxied);
    tokio::spawn(serve_plain(plain_listener, app));
  }

  std::future::pending::<()>().await;
  Ok(())
}

async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, app: Router) {
  let protocol = Arc::new(http1::Builder::new());
  loop {
    let (tcp_stream, _) = match listener.accept().await {
      Ok(pair) => pair,
      Err(err) => {
        error!("TLS accept error: {err:#}");
        continue;
      },
    };
    let acceptor = acceptor.clone();
    let tower_service = app.clone();
    let protocol = protocol.clone();

    tokio::spawn(async move {
      match acceptor.accept(tcp_stream).await {
        Ok(tls_stream) => {
          let io = TokioIo::new(tls_stream);
          let hyper_service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
            tower_service.clone().call(request)
          });
          let _ = protocol.serve_connection(io, hyper_service).with_upgrades().await;
        },
        Err(err) => error!("TLS handshake error: {err:#}"),
      }
    });
  }
}

async fn serve_plain(listener: TcpListener, app: Router) {
  let protocol = Arc::new(http1::Builder::new());
  loop {
    let (tcp_stream, _) = match listener.accept().await {
      Ok(pair) => pair,
      Err(err) => {
        error!("plaintext accept error: {err:#}");
        continue;
      },
    };
    let tower_service = app.clone();
    let protocol = protocol.clone();

    tokio::spawn(async move {
      let io = TokioIo::new(tcp_stream);
      let hyper_service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
        tower_service.clone().call(request)
      });
      let _ = protocol.serve_connection(io, hyper_service).with_upgrades().await;
    });
  }
}

fn load_certs(path: impl AsRef<Path>) -> io::Result<Vec<CertificateDer<'static>>> {
  let file = fs::File::open(path.as_ref())?;
  let mut reader = io::BufReader::new(file);
  rustls_pemfile::certs(&mut reader).collect()
}

fn load_private_key(path: impl AsRef<Path>) -> io::Result<PrivateKeyDer<'static>> {
  let file = fs::File::open(path.as_ref())?;
  let mut reader = io::BufReader::new(file);
  rustls_pemfile::private_key(&mut reader)?
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found"))
}
