//! Process exit codes by failure class.

use std::process::ExitCode;

use helix_core::{PairError, SyncError};

pub const SUCCESS: u8 = 0;
/// Unclassified failure.
pub const GENERAL: u8 = 1;
/// Configuration problems: uninitialized directories, wrong passphrase,
/// directory-id mismatch.
pub const CONFIG: u8 = 2;
/// Integrity problems: corrupt state, cyclic ordering.
pub const INTEGRITY: u8 = 3;
/// The run completed but conflicts remain unresolved.
pub const CONFLICTS: u8 = 4;
/// The run completed but some items failed.
pub const PARTIAL: u8 = 5;

pub fn from_error(error: &anyhow::Error) -> ExitCode {
    if error.downcast_ref::<PairError>().is_some() {
        return ExitCode::from(CONFIG);
    }
    if let Some(sync) = error.downcast_ref::<SyncError>() {
        return match sync {
            SyncError::CyclicDependency => ExitCode::from(INTEGRITY),
            _ => ExitCode::from(GENERAL),
        };
    }
    ExitCode::from(GENERAL)
}
