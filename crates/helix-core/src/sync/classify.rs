//! Change classification.
//!
//! For each reconciliation record the classifier decides, from the three
//! sources (log record, decrypted entry, encrypted blob), whether each
//! side changed since the last sync, then folds the two booleans into a
//! `SyncMode`. Once blob headers have been fetched, a second pass splits
//! the both-changed case into `Match` (the sides already agree) and
//! `Conflict`, and derives the user-visible operation.

use crate::fs::entry::EntryKind;

use super::item::{DisplayOperation, PreSync, SyncMode};

/// Whether the decrypted side diverged from the logged state.
fn decr_changed(item: &PreSync) -> bool {
    let info = item.decr_info.as_ref();
    let missing = item.decr_missing();

    match &item.log_entry {
        // No history: only a present entry counts as a change; absence
        // with no history contradicts nothing.
        None => !missing,
        Some(log) => {
            if log.kind.is_tombstone() {
                // Tombstone in the log: a present entry is a re-creation.
                !missing
            } else if missing {
                true
            } else {
                let info = info.expect("present entry has info");
                // Directory mtimes churn whenever children are written,
                // so for directories only kind and name count.
                let same_time = log.kind == EntryKind::Directory
                    || Some(log.decr_modified) == info.modified();
                !(log.kind == info.kind() && log.decr_name == info.path && same_time)
            }
        }
    }
}

/// The encrypted side's relation to the logged state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncrState {
    Unchanged,
    Changed,
    /// The log records a live entry but the blob is gone. The pair is
    /// single-writer, so this is an inconsistency, not a removal.
    Orphan,
}

fn encr_state(item: &PreSync) -> EncrState {
    match (&item.log_entry, &item.encr_info) {
        (None, None) => EncrState::Unchanged,
        (None, Some(info)) => {
            if info.kind().is_tombstone() {
                EncrState::Unchanged
            } else {
                EncrState::Changed
            }
        }
        (Some(log), None) => {
            if log.kind.is_tombstone() {
                // The removal is already reflected on disk.
                EncrState::Unchanged
            } else {
                EncrState::Orphan
            }
        }
        (Some(log), Some(info)) => {
            if log.encr_name == info.path.as_str()
                && Some(log.encr_modified) == info.modified()
            {
                EncrState::Unchanged
            } else {
                EncrState::Changed
            }
        }
    }
}

/// Both sides changed: do they agree?
///
/// Agreement means the same entry kind, last-write time, and length; a
/// removal on the decrypted side with no recovered header is agreement
/// too (the delete is already reflected).
fn both_changed_mode(item: &PreSync) -> SyncMode {
    if item.decr_missing() && item.encr_header.is_none() {
        return SyncMode::Match;
    }
    match (&item.decr_info, &item.encr_header) {
        (Some(info), Some(header)) if info.kind() == header.kind => {
            let agrees = header.kind == EntryKind::Directory
                || (info.modified() == Some(header.modified) && info.len() == header.len);
            if agrees {
                SyncMode::Match
            } else {
                SyncMode::Conflict
            }
        }
        _ => SyncMode::Conflict,
    }
}

/// Determine the sync mode of one record. Run once before headers are
/// fetched and again afterwards.
pub(crate) fn classify(item: &mut PreSync) {
    let decr = decr_changed(item);
    let encr = encr_state(item);

    item.mode = match (decr, encr) {
        (false, EncrState::Unchanged) => SyncMode::Unchanged,
        (false, EncrState::Changed) => SyncMode::EncryptedSide,
        (false, EncrState::Orphan) => SyncMode::Unknown,
        (true, EncrState::Unchanged) => SyncMode::DecryptedSide,
        // With the blob gone and the decrypted entry gone too, the
        // both-changed rules recognize the delete as already agreed.
        (true, EncrState::Changed) | (true, EncrState::Orphan) => both_changed_mode(item),
    };
}

/// Derive the user-visible operation and display fields from the mode.
pub(crate) fn assign_display(item: &mut PreSync) {
    let log_tombstone = item
        .log_entry
        .as_ref()
        .map(|l| l.kind.is_tombstone())
        .unwrap_or(false);

    let (operation, kind, len) = match item.mode {
        SyncMode::Unchanged | SyncMode::Match | SyncMode::Conflict => {
            let (kind, len) = side_display(item);
            (DisplayOperation::None, kind, len)
        }
        SyncMode::DecryptedSide => {
            if item.decr_missing() {
                (DisplayOperation::Remove, EntryKind::Removed, 0)
            } else {
                let info = item.decr_info.as_ref().expect("present entry has info");
                let op = if item.encr_missing() {
                    DisplayOperation::Add
                } else {
                    DisplayOperation::Change
                };
                (op, info.kind(), info.len())
            }
        }
        SyncMode::EncryptedSide => {
            if log_tombstone && item.decr_missing() && item.encr_missing() {
                (DisplayOperation::Purge, EntryKind::Purged, 0)
            } else if item.encr_missing() {
                (DisplayOperation::Remove, EntryKind::Removed, 0)
            } else {
                let (kind, len) = item
                    .encr_header
                    .as_ref()
                    .map(|h| (h.kind, h.len))
                    .unwrap_or_else(|| side_display(item));
                let op = if item.decr_missing() {
                    DisplayOperation::Add
                } else {
                    DisplayOperation::Change
                };
                (op, kind, len)
            }
        }
        SyncMode::Unknown => {
            let (kind, len) = side_display(item);
            (DisplayOperation::Error, kind, len)
        }
    };

    item.operation = operation;
    item.display_kind = kind;
    item.display_len = len;
}

/// Best-effort kind/length from whichever source knows the entry.
fn side_display(item: &PreSync) -> (EntryKind, u64) {
    if let Some(info) = &item.decr_info {
        (info.kind(), info.len())
    } else if let Some(header) = &item.encr_header {
        (header.kind, header.len)
    } else if let Some(log) = &item.log_entry {
        (log.kind, 0)
    } else if let Some(info) = &item.encr_info {
        (info.kind(), info.len())
    } else {
        (EntryKind::Removed, 0)
    }
}
