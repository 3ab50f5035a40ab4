use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "convergence", author, version, about = "Convergence notary server")]
pub struct Cli {
  #[command(subcommand)]
  pub command: Command,

  /// Path to a YAML config file, merged under CLI flags and NOTARY_* env vars.
  #[arg(long, global = true, default_value = "config.yaml")]
  pub config: PathBuf,

  /// Enable debug-level logging.
  #[arg(short, long, global = true)]
  pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
  /// Run the notary server.
  Notary(NotaryArgs),

  /// Create the SQLite fingerprint database.
  Createdb {
    /// Path to the database file to create.
    db: PathBuf,
  },

  /// Generate a self-signed server certificate and key via openssl.
  Gencert(GencertArgs),

  /// Interactively build a `.notary` bundle file for distribution.
  Bundle {
    /// Output path; defaults to `<name>.notary`.
    output: Option<PathBuf>,
  },
}

/// Every field is optional and carries no clap default: an absent field
/// means "not supplied on the command line or its own env var", so
/// `config::load` knows to leave the value it already merged from
/// `config.yaml`/`NOTARY_*` in place instead of clobbering it with a
/// default that was never actually requested.
#[derive(Args, Clone, Debug)]
pub struct NotaryArgs {
  /// Plain-HTTP CONNECT proxy port. Defaults to 80 if not set here, in
  /// the config file, or via NOTARY_PROXY_PORT.
  #[arg(short = 'p', long, env = "NOTARY_PROXY_PORT")]
  pub proxy_port: Option<u16>,

  /// TLS-wrapped HTTP port serving `/` and `/target/...`. Defaults to 443.
  #[arg(short = 's', long, env = "NOTARY_TLS_PORT")]
  pub tls_port: Option<u16>,

  /// Plaintext mirror of the TLS port, for use behind a reverse proxy.
  /// Port 4242 is load-bearing: the CONNECT tunnel hard-codes it. Defaults
  /// to 4242.
  #[arg(short = 'x', long, env = "NOTARY_TLS_PORT_PROXIED")]
  pub tls_port_proxied: Option<u16>,

  /// Disable the proxied-TLS listener entirely.
  #[arg(long)]
  pub no_https: bool,

  /// Interface/address to bind all listeners to. Defaults to 0.0.0.0.
  #[arg(short = 'i', long, env = "NOTARY_INTERFACE")]
  pub interface: Option<String>,

  /// PEM file containing the server certificate chain.
  #[arg(short = 'c', long, env = "NOTARY_CERT")]
  pub cert: Option<PathBuf>,

  /// PEM file containing the server private key. Defaults to `--cert` when omitted
  /// (the same file may carry both cert and key).
  #[arg(short = 'k', long, env = "NOTARY_CERT_KEY")]
  pub cert_key: Option<PathBuf>,

  /// SQLite fingerprint database path. Defaults to
  /// /var/lib/convergence/convergence.db.
  #[arg(short = 'd', long, env = "NOTARY_DB")]
  pub db: Option<PathBuf>,

  /// Verifier backend: perspective | dns | always-true | always-false.
  /// Defaults to perspective.
  #[arg(short = 'b', long, env = "NOTARY_BACKEND")]
  pub backend: Option<String>,

  /// Backend-specific options string, e.g. "verify_ca,bind=10.0.0.1".
  #[arg(short = 'o', long, env = "NOTARY_BACKEND_OPTIONS")]
  pub backend_options: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct GencertArgs {
  /// Output path for the generated certificate.
  #[arg(long, default_value = "./server-cert.pem")]
  pub cert_out: PathBuf,

  /// Output path for the generated private key.
  #[arg(long, default_value = "./server-key.pem")]
  pub key_out: PathBuf,

  /// Subject common name for the self-signed certificate.
  #[arg(long, default_value = "localhost")]
  pub common_name: String,

  /// RSA key size in bits.
  #[arg(long, default_value_t = 2048)]
  pub key_size: u32,

  /// Certificate validity, in days.
  #[arg(long, default_value_t = 365)]
  pub days: u32,
}
