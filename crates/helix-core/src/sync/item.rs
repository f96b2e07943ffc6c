//! Per-entry reconciliation records.

use std::fmt;

use crate::fs::entry::{EntryKind, FsEntry};
use crate::fs::file::FileHeader;
use crate::fs::path::SyncPath;

use super::log::SyncLogEntry;

/// Which way (if any) an entry needs to be propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncMode {
    /// Nothing changed on either side.
    Unchanged,
    /// Both sides changed but already agree; only the log needs refreshing.
    Match,
    /// Both sides changed and disagree; a side must be chosen.
    Conflict,
    /// Only the decrypted side changed; propagate decrypted -> encrypted.
    DecryptedSide,
    /// Only the encrypted side changed; propagate encrypted -> decrypted.
    EncryptedSide,
    /// The three sources are inconsistent; nothing can be applied.
    Unknown,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncMode::Unchanged => "unchanged",
            SyncMode::Match => "match",
            SyncMode::Conflict => "conflict",
            SyncMode::DecryptedSide => "decrypted-side",
            SyncMode::EncryptedSide => "encrypted-side",
            SyncMode::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// The user-visible operation a changed entry will undergo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DisplayOperation {
    None,
    Add,
    Change,
    Remove,
    /// Reconcile a stale tombstone against the log without disk I/O.
    Purge,
    Error,
}

impl fmt::Display for DisplayOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisplayOperation::None => "none",
            DisplayOperation::Add => "add",
            DisplayOperation::Change => "change",
            DisplayOperation::Remove => "remove",
            DisplayOperation::Purge => "purge",
            DisplayOperation::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Working record for one logical entry during a sync run.
///
/// Assembled by the matcher from the three sources (decrypted tree,
/// encrypted tree, sync log), then classified. Records live only for the
/// duration of one `find_changes` invocation; the tree snapshots they
/// carry are owned, so the executor may mutate the live trees freely.
#[derive(Debug, Clone)]
pub struct PreSync {
    /// Decrypted relative path. Unknown for an encrypted blob whose
    /// header could not be read.
    pub decr_name: Option<SyncPath>,
    /// Obfuscated filename on the encrypted side.
    pub encr_name: Option<String>,
    /// Most recent log record for this path.
    pub log_entry: Option<SyncLogEntry>,
    /// Snapshot of the decrypted-side entry.
    pub decr_info: Option<FsEntry>,
    /// Snapshot of the encrypted-side blob.
    pub encr_info: Option<FsEntry>,
    /// Decrypted blob header, fetched between classification passes.
    pub encr_header: Option<FileHeader>,
    pub mode: SyncMode,
    pub operation: DisplayOperation,
    /// Entry kind shown to the user for this item.
    pub display_kind: EntryKind,
    /// Content length shown to the user for this item.
    pub display_len: u64,
}

impl PreSync {
    pub(crate) fn empty() -> Self {
        PreSync {
            decr_name: None,
            encr_name: None,
            log_entry: None,
            decr_info: None,
            encr_info: None,
            encr_header: None,
            mode: SyncMode::Unknown,
            operation: DisplayOperation::None,
            display_kind: EntryKind::File,
            display_len: 0,
        }
    }

    /// The best human-readable name for this item.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.decr_name {
            name.to_string()
        } else if let Some(name) = &self.encr_name {
            format!("<{name}>")
        } else {
            "<unknown>".to_string()
        }
    }

    /// Whether the decrypted side is absent or a tombstone.
    pub(crate) fn decr_missing(&self) -> bool {
        self.decr_info
            .as_ref()
            .map(|e| e.kind().is_tombstone())
            .unwrap_or(true)
    }

    /// Whether the encrypted side is absent, a tombstone entry, or a
    /// blob whose header says the entry was removed.
    pub(crate) fn encr_missing(&self) -> bool {
        let info_missing = self
            .encr_info
            .as_ref()
            .map(|e| e.kind().is_tombstone())
            .unwrap_or(true);
        let header_removed = self
            .encr_header
            .as_ref()
            .map(|h| h.kind.is_tombstone())
            .unwrap_or(false);
        info_missing || header_removed
    }
}
