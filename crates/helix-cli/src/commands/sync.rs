use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::ValueEnum;
use helix_core::{DirectoryPair, PairOptions, SyncMode, SyncResult, SyncSide};
use tracing::info;

use crate::exit_code;

use super::status::print_item;

/// Which side wins conflicted entries.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Prefer {
    Decrypted,
    Encrypted,
}

impl From<Prefer> for SyncSide {
    fn from(prefer: Prefer) -> Self {
        match prefer {
            Prefer::Decrypted => SyncSide::Decrypted,
            Prefer::Encrypted => SyncSide::Encrypted,
        }
    }
}

pub fn run(
    decrypted: &Path,
    encrypted: &Path,
    passphrase: &str,
    dry_run: bool,
    prefer: Option<Prefer>,
) -> Result<ExitCode> {
    let mut pair = DirectoryPair::open(
        PairOptions::new(decrypted, encrypted, passphrase).what_if(dry_run),
    )?;

    let items = pair.find_changes()?;
    if items.is_empty() {
        println!("in sync, nothing to do");
        return Ok(ExitCode::from(exit_code::SUCCESS));
    }

    let mut applied = 0usize;
    let mut unchanged = 0usize;
    let mut conflicts = 0usize;
    let mut failures = 0usize;

    for item in &items {
        print_item(item);

        let result = match (item.mode, prefer) {
            (SyncMode::Conflict, None) => {
                conflicts += 1;
                println!("        ^ conflict left unresolved (use --prefer)");
                continue;
            }
            (SyncMode::Conflict, Some(side)) => pair.try_sync_resolved(item, side.into()),
            _ => pair.try_sync(item),
        };

        match result {
            SyncResult::Applied => applied += 1,
            SyncResult::Unchanged => unchanged += 1,
            SyncResult::Failed(error) => {
                failures += 1;
                eprintln!("        ^ failed: {error}");
            }
        }
    }

    info!(applied, unchanged, conflicts, failures, "sync finished");
    let verb = if dry_run { "would apply" } else { "applied" };
    println!("{verb} {applied}, unchanged {unchanged}, conflicts {conflicts}, failed {failures}");

    let code = if conflicts > 0 {
        exit_code::CONFLICTS
    } else if failures > 0 {
        exit_code::PARTIAL
    } else {
        exit_code::SUCCESS
    };
    Ok(ExitCode::from(code))
}
