use std::{fs, path::PathBuf};

use dialoguer::{Input, theme::ColorfulTheme};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct NotaryBundle {
  name:                String,
  url:                 String,
  public_key_pem_path: String,
  default_backend:     String,
}

/// Interactively prompt for notary metadata and write a `.notary` import
/// file, mirroring `original_source/server/convergence/core.py`'s `bundle`
/// subcommand (which the original drove with a similar prompt sequence
/// before emitting a serialized descriptor).
pub fn run(output: Option<PathBuf>) -> eyre::Result<()> {
  let theme = ColorfulTheme::default();

  let name: String = Input::with_theme(&theme).with_prompt("Notary name").interact_text()?;
  let url: String =
    Input::with_theme(&theme).with_prompt("Notary URL (https://host:port)").interact_text()?;
  let public_key_pem_path: String =
    Input::with_theme(&theme).with_prompt("Path to the notary's public key PEM").interact_text()?;
  let default_backend: String = Input::with_theme(&theme)
    .with_prompt("Default verifier backend")
    .default("perspective".to_string())
    .interact_text()?;

  let bundle = NotaryBundle { name: name.clone(), url, public_key_pem_path, default_backend };

  let output = output.unwrap_or_else(|| PathBuf::from(format!("{name}.notary")));
  fs::write(&output, serde_json::to_string_pretty(&bundle)?)?;
  println!("wrote bundle to {}", output.display());

  Ok(())
}
