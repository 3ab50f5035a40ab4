mod bundle;
mod cli;
mod coalescer;
mod config;
mod error;
mod gencert;
mod info;
#[cfg(test)]
mod integration_tests;
mod listener;
mod logging;
mod proxy;
mod signer;
mod store;
mod target;
mod verifier;

use std::sync::Arc;

use clap::Parser;

use crate::{
  cli::{Cli, Command, NotaryArgs},
  coalescer::Coalescer,
  error::OptionsError,
  listener::AppState,
  signer::ResponseSigner,
  store::FingerprintStore,
  verifier::{
    dns::DnsVerifier,
    fixtures::{AlwaysFalseVerifier, AlwaysTrueVerifier},
    perspective::NetworkPerspectiveVerifier,
    Verifier,
  },
};

#[tokio::main]
async fn main() -> eyre::Result<()> {
  let cli = Cli::parse();
  logging::init(cli.verbose);

  match cli.command {
    Command::Notary(args) => run_notary(&cli.config, &args).await,
    Command::Createdb { db } => {
      FingerprintStore::create_schema(&db)?;
      println!("created database at {}", db.display());
      Ok(())
    },
    Command::Gencert(args) => gencert::run(&args),
    Command::Bundle { output } => bundle::run(output),
  }
}

async fn run_notary(config_path: &std::path::Path, args: &NotaryArgs) -> eyre::Result<()> {
  let config = config::load(&config_path.to_path_buf(), args)?;

  let store = FingerprintStore::open(&config.db)?;
  let verifier = select_backend(&config.backend, &config.backend_options)?;
  let signer = ResponseSigner::from_pem_file(config.cert_key_path())?;

  let state = Arc::new(AppState { store, verifier, coalescer: Coalescer::new(), signer });

  listener::run(&config, state).await
}

fn select_backend(backend: &str, options: &str) -> eyre::Result<Arc<dyn Verifier>> {
  let verifier: Arc<dyn Verifier> = match backend {
    "perspective" => Arc::new(NetworkPerspectiveVerifier::new(options)?),
    "dns" => Arc::new(DnsVerifier::new()?),
    "always-true" => Arc::new(AlwaysTrueVerifier),
    "always-false" => Arc::new(AlwaysFalseVerifier),
    other => return Err(OptionsError::UnknownBackend(other.to_string()).into()),
  };
  Ok(verifier)
}
