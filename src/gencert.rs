use std::process::Command;

use crate::cli::GencertArgs;

/// Shell out to `openssl` to produce a self-signed server certificate and
/// key, exactly as the original `gencert` subcommand does
/// (`subprocess.Popen` calls to `openssl genrsa`/`req`/`x509`). Rust
/// certificate-generation crates exist, but the original deliberately
/// delegates to the system OpenSSL binary, and this keeps that contract.
pub fn run(args: &GencertArgs) -> eyre::Result<()> {
  let key_out = args.key_out.to_string_lossy().into_owned();
  let cert_out = args.cert_out.to_string_lossy().into_owned();
  let csr_out = format!("{key_out}.csr");

  run_openssl(&[
    "genrsa".to_string(),
    "-out".to_string(),
    key_out.clone(),
    args.key_size.to_string(),
  ])?;

  run_openssl(&[
    "req".to_string(),
    "-new".to_string(),
    "-key".to_string(),
    key_out.clone(),
    "-out".to_string(),
    csr_out.clone(),
    "-subj".to_string(),
    format!("/CN={}", args.common_name),
  ])?;

  run_openssl(&[
    "x509".to_string(),
    "-req".to_string(),
    "-in".to_string(),
    csr_out.clone(),
    "-signkey".to_string(),
    key_out,
    "-out".to_string(),
    cert_out,
    "-days".to_string(),
    args.days.to_string(),
  ])?;

  std::fs::remove_file(&csr_out).ok();

  println!("generated certificate at {} and key at {}", args.cert_out.display(), args.key_out.display());
  Ok(())
}

fn run_openssl(args: &[String]) -> eyre::Result<()> {
  let status = Command::new("openssl").args(args).status()?;
  if !status.success() {
    eyre::bail!("openssl {} exited with {}", args.join(" "), status);
  }
  Ok(())
}
