use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use helix_core::DirectoryPair;

use crate::exit_code;

pub fn run(decrypted: &Path, encrypted: &Path, passphrase: &str) -> Result<ExitCode> {
    fs::create_dir_all(decrypted)
        .with_context(|| format!("creating decrypted directory '{}'", decrypted.display()))?;
    fs::create_dir_all(encrypted)
        .with_context(|| format!("creating encrypted directory '{}'", encrypted.display()))?;

    let directory_id = DirectoryPair::init(decrypted, encrypted, passphrase)?;
    println!("initialized pair {directory_id}");
    println!("  decrypted: {}", decrypted.display());
    println!("  encrypted: {}", encrypted.display());
    Ok(ExitCode::from(exit_code::SUCCESS))
}
