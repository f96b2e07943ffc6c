//! The three-way reconciliation and sync engine.
//!
//! A sync run joins the decrypted tree, the encrypted mirror, and the
//! sync log into per-entry records (matcher), decides what changed and
//! which way to propagate (classifier), orders the work so no operation
//! runs before its prerequisites (sorter), and applies each record
//! (executor). The matcher, classifier, and sorter either produce a
//! complete result or fail the run; the executor reports per item and
//! the run continues.

pub mod execute;
pub mod item;
pub mod log;

pub(crate) mod classify;
pub(crate) mod matcher;
pub(crate) mod order;

use thiserror::Error;

use crate::fs::name::NameError;
use crate::fs::tree::FsError;

pub use execute::{ItemError, SyncResult, SyncSide};
pub use item::{DisplayOperation, PreSync, SyncMode};
pub use log::{LogError, SyncLog, SyncLogEntry};

/// Run-fatal errors from change discovery.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The planned operations depend on each other cyclically. The
    /// ordering rules cannot produce this for valid inputs; it signals
    /// a bug.
    #[error("cyclic dependency between planned operations")]
    CyclicDependency,

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Name(#[from] NameError),
}
