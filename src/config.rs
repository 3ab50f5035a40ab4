use std::{fs, path::PathBuf};

use serde::Deserialize;

use crate::cli::NotaryArgs;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Config {
  pub proxy_port:       u16,
  pub tls_port:         u16,
  pub tls_port_proxied: u16,
  pub no_https:         bool,
  pub interface:        String,
  pub cert:             String,
  pub cert_key:         String,
  pub db:               String,
  pub backend:          String,
  pub backend_options:  String,
}

impl Config {
  pub fn cert_path(&self) -> PathBuf { PathBuf::from(&self.cert) }

  pub fn cert_key_path(&self) -> PathBuf {
    if self.cert_key.is_empty() { PathBuf::from(&self.cert) } else { PathBuf::from(&self.cert_key) }
  }
}

/// Merge defaults, an optional YAML file, `NOTARY_*` environment
/// variables, and the parsed CLI flags into one `Config`, in that order of
/// increasing precedence.
pub fn load(config_path: &PathBuf, args: &NotaryArgs) -> eyre::Result<Config> {
  let builder = config::Config::builder()
    .set_default("proxy_port", 80)?
    .set_default("tls_port", 443)?
    .set_default("tls_port_proxied", 4242)?
    .set_default("no_https", false)?
    .set_default("interface", "0.0.0.0")?
    .set_default("cert", "")?
    .set_default("cert_key", "")?
    .set_default("db", "/var/lib/convergence/convergence.db")?
    .set_default("backend", "perspective")?
    .set_default("backend_options", "")?;

  let builder = if fs::metadata(config_path).is_ok() {
    builder.add_source(config::File::new(&config_path.to_string_lossy(), config::FileFormat::Yaml))
  } else {
    builder
  };

  let builder =
    builder.add_source(config::Environment::with_prefix("NOTARY").try_parsing(true).separator("_"));

  let mut config: Config = builder.build()?.try_deserialize()?;

  // Only apply a CLI/its-own-env-var override when the flag was actually
  // supplied; an absent flag must leave whatever the file/NOTARY_*
  // layering already produced untouched, not reassert a clap default
  // over it. `no_https` is a plain presence flag, so it can only turn the
  // setting on, never clear a `true` that the file already set.
  if let Some(proxy_port) = args.proxy_port {
    config.proxy_port = proxy_port;
  }
  if let Some(tls_port) = args.tls_port {
    config.tls_port = tls_port;
  }
  if let Some(tls_port_proxied) = args.tls_port_proxied {
    config.tls_port_proxied = tls_port_proxied;
  }
  if args.no_https {
    config.no_https = true;
  }
  if let Some(interface) = &args.interface {
    config.interface = interface.clone();
  }
  if let Some(cert) = &args.cert {
    config.cert = cert.to_string_lossy().into_owned();
  }
  if let Some(key) = &args.cert_key {
    config.cert_key = key.to_string_lossy().into_owned();
  }
  if let Some(db) = &args.db {
    config.db = db.to_string_lossy().into_owned();
  }
  if let Some(backend) = &args.backend {
    config.backend = backend.clone();
  }
  if let Some(backend_options) = &args.backend_options {
    config.backend_options = backend_options.clone();
  }

  Ok(config)
}
