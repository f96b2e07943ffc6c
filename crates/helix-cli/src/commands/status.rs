use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use helix_core::{DirectoryPair, PairOptions, PreSync};

use crate::exit_code;

pub fn run(decrypted: &Path, encrypted: &Path, passphrase: &str) -> Result<ExitCode> {
    let mut pair = DirectoryPair::open(
        PairOptions::new(decrypted, encrypted, passphrase).what_if(true),
    )?;

    let items = pair.find_changes()?;
    if items.is_empty() {
        println!("in sync, nothing to do");
        return Ok(ExitCode::from(exit_code::SUCCESS));
    }

    for item in &items {
        print_item(item);
    }
    println!("{} pending operation(s)", items.len());
    Ok(ExitCode::from(exit_code::SUCCESS))
}

pub fn print_item(item: &PreSync) {
    println!(
        "{:<7} {:<10} {:<15} {:>10}  {}",
        item.operation.to_string(),
        item.display_kind.to_string(),
        item.mode.to_string(),
        item.display_len,
        item.display_name()
    );
}
