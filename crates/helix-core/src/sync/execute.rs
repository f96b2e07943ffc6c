//! Application of planned operations.
//!
//! `try_sync` applies one record and reports the outcome per item.
//! Expected file-state failures never abort the run: the caller receives
//! a `SyncResult::Failed` and continues with the remaining ordered
//! items. Each call is the atomic unit of a run; a partially applied
//! item leaves state the next run's classifier recovers from.

use thiserror::Error;
use tracing::{debug, instrument};

use crate::fs::entry::{EntryKind, Timestamp};
use crate::fs::file::{self, EncryptOptions, FileError};
use crate::fs::path::SyncPath;
use crate::fs::tree::FsError;
use crate::pair::DirectoryPair;

use super::item::{DisplayOperation, PreSync, SyncMode};
use super::log::{LogError, SyncLogEntry};

/// Which side wins when applying a conflicted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSide {
    Decrypted,
    Encrypted,
}

/// Per-item outcome of one executor call.
#[derive(Debug)]
pub enum SyncResult {
    /// The operation was applied and logged.
    Applied,
    /// Everything already agreed; nothing was written.
    Unchanged,
    /// The item could not be applied; the run continues.
    Failed(ItemError),
}

impl SyncResult {
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncResult::Failed(_))
    }
}

#[derive(Error, Debug)]
pub enum ItemError {
    /// Both sides changed and disagree; the driver must choose a side.
    #[error("conflicting changes on both sides; choose a side to apply")]
    Conflict,

    /// The decrypted side already holds the path under a different case.
    #[error("decrypted path '{path}' collides with existing '{existing}' (case-only difference)")]
    CaseOnlyConflict { path: SyncPath, existing: SyncPath },

    #[error("item cannot be applied: {reason}")]
    Unapplyable { reason: String },

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Log(#[from] LogError),
}

fn unapplyable(reason: impl Into<String>) -> ItemError {
    ItemError::Unapplyable {
        reason: reason.into(),
    }
}

impl DirectoryPair {
    /// Apply one record.
    ///
    /// Conflicted records are refused until the driver chooses a side
    /// (see [`try_sync_resolved`](Self::try_sync_resolved)). Never
    /// panics or aborts the run for expected file-state failures.
    #[instrument(skip(self, item), fields(name = %item.display_name(), mode = %item.mode, op = %item.operation))]
    pub fn try_sync(&mut self, item: &PreSync) -> SyncResult {
        let result = match item.mode {
            SyncMode::Unchanged => Ok(SyncResult::Unchanged),
            SyncMode::Match => self.apply_match(item),
            SyncMode::Conflict => Err(ItemError::Conflict),
            SyncMode::DecryptedSide => self.apply_decrypted_side(item, item.operation),
            SyncMode::EncryptedSide => self.apply_encrypted_side(item, item.operation),
            SyncMode::Unknown => Err(unapplyable("sources are inconsistent for this entry")),
        };
        finish(item, result)
    }

    /// Apply one record, resolving a conflict in favor of `side`.
    #[instrument(skip(self, item), fields(name = %item.display_name(), side = ?side))]
    pub fn try_sync_resolved(&mut self, item: &PreSync, side: SyncSide) -> SyncResult {
        if item.mode != SyncMode::Conflict {
            return self.try_sync(item);
        }
        let result = match side {
            SyncSide::Decrypted => {
                let operation = if item.decr_missing() {
                    DisplayOperation::Remove
                } else if item.encr_missing() {
                    DisplayOperation::Add
                } else {
                    DisplayOperation::Change
                };
                self.apply_decrypted_side(item, operation)
            }
            SyncSide::Encrypted => {
                let operation = if item.encr_missing() {
                    DisplayOperation::Remove
                } else if item.decr_missing() {
                    DisplayOperation::Add
                } else {
                    DisplayOperation::Change
                };
                self.apply_encrypted_side(item, operation)
            }
        };
        finish(item, result)
    }

    /// Both sides already agree: record the agreement.
    fn apply_match(&mut self, item: &PreSync) -> Result<SyncResult, ItemError> {
        let decr_name = require_decr_name(item)?;
        let encr_name = require_encr_name(item)?;
        let now = Timestamp::now();

        let entry = SyncLogEntry {
            kind: item
                .decr_info
                .as_ref()
                .map(|info| info.kind())
                .unwrap_or(EntryKind::Removed),
            decr_name,
            decr_modified: item
                .decr_info
                .as_ref()
                .and_then(|info| info.modified())
                .unwrap_or(now),
            encr_name,
            encr_modified: item
                .encr_info
                .as_ref()
                .and_then(|info| info.modified())
                .unwrap_or(now),
        };
        self.append_log(entry)
    }

    /// Propagate the decrypted side onto the encrypted side.
    fn apply_decrypted_side(
        &mut self,
        item: &PreSync,
        operation: DisplayOperation,
    ) -> Result<SyncResult, ItemError> {
        let decr_name = require_decr_name(item)?;
        let encr_name = require_encr_name(item)?;
        let blob_rel = SyncPath::new(&encr_name);

        match operation {
            DisplayOperation::Remove => {
                if self.encr.try_get_entry(blob_rel.as_str())?.is_some() {
                    self.encr.delete_file(&blob_rel)?;
                }
                let now = Timestamp::now();
                self.append_log(SyncLogEntry {
                    kind: EntryKind::Removed,
                    decr_name,
                    decr_modified: now,
                    encr_name,
                    encr_modified: now,
                })
            }
            DisplayOperation::Add | DisplayOperation::Change => {
                let info = item
                    .decr_info
                    .as_ref()
                    .ok_or_else(|| unapplyable("no decrypted entry to encrypt"))?;
                let modified = info.modified().unwrap_or_else(Timestamp::now);

                if self.is_what_if() {
                    let ghost = self.encr.what_if_add_file(&blob_rel, info.len())?;
                    let encr_modified = ghost.modified().unwrap_or_else(Timestamp::now);
                    return self.append_log(SyncLogEntry {
                        kind: info.kind(),
                        decr_name,
                        decr_modified: modified,
                        encr_name,
                        encr_modified,
                    });
                }

                let source_abs = self.decr.abs_path(&info.path);
                let dest_abs = self.encr.abs_path(&blob_rel);
                let source = (info.kind() == EntryKind::File).then_some(source_abs.as_path());
                file::encrypt_file(
                    source,
                    &dest_abs,
                    &self.key,
                    &EncryptOptions {
                        name: decr_name.clone(),
                        kind: info.kind(),
                        modified,
                    },
                )?;

                let mut blob = self
                    .encr
                    .refresh_entry(&blob_rel)?
                    .ok_or_else(|| unapplyable("encrypted blob vanished after write"))?;

                // Filesystem time quantization could make this overwrite
                // look identical to the logged state next run; enforce a
                // minimum 1 s monotonic advance over the previous entry.
                if let (Some(prev), Some(mtime)) = (&item.log_entry, blob.modified()) {
                    let floor = prev.encr_modified.plus_millis(1_000);
                    if mtime < floor {
                        filetime::set_file_mtime(&dest_abs, floor.to_file_time()).map_err(
                            |e| {
                                ItemError::Fs(FsError::Io {
                                    path: dest_abs.clone(),
                                    source: e,
                                })
                            },
                        )?;
                        blob = self
                            .encr
                            .refresh_entry(&blob_rel)?
                            .ok_or_else(|| unapplyable("encrypted blob vanished after write"))?;
                        debug!(name = %decr_name, "advanced blob mtime past quantization window");
                    }
                }

                let encr_modified = blob.modified().unwrap_or_else(Timestamp::now);
                self.append_log(SyncLogEntry {
                    kind: info.kind(),
                    decr_name,
                    decr_modified: modified,
                    encr_name,
                    encr_modified,
                })
            }
            other => Err(unapplyable(format!(
                "operation '{other}' cannot propagate the decrypted side"
            ))),
        }
    }

    /// Propagate the encrypted side onto the decrypted side.
    fn apply_encrypted_side(
        &mut self,
        item: &PreSync,
        operation: DisplayOperation,
    ) -> Result<SyncResult, ItemError> {
        let encr_name = require_encr_name(item)?;

        match operation {
            DisplayOperation::Purge => {
                let log_entry = item
                    .log_entry
                    .as_ref()
                    .ok_or_else(|| unapplyable("purge without a log tombstone"))?;
                let decr_name = item
                    .decr_name
                    .clone()
                    .unwrap_or_else(|| log_entry.decr_name.clone());
                let encr_modified = item
                    .encr_info
                    .as_ref()
                    .and_then(|info| info.modified())
                    .unwrap_or(log_entry.encr_modified);
                self.append_log(SyncLogEntry {
                    kind: EntryKind::Purged,
                    decr_name,
                    decr_modified: log_entry.decr_modified,
                    encr_name,
                    encr_modified,
                })
            }
            DisplayOperation::Remove => {
                let decr_name = require_decr_name(item)?;
                if let Some(existing) = self.decr.try_get_entry(decr_name.as_str())? {
                    match existing.kind() {
                        EntryKind::Directory => self.decr.delete_directory(&decr_name, false)?,
                        EntryKind::File => self.decr.delete_file(&decr_name)?,
                        _ => {}
                    }
                }
                let now = Timestamp::now();
                let encr_modified = item
                    .encr_info
                    .as_ref()
                    .and_then(|info| info.modified())
                    .unwrap_or(now);
                self.append_log(SyncLogEntry {
                    kind: EntryKind::Removed,
                    decr_name,
                    decr_modified: now,
                    encr_name,
                    encr_modified,
                })
            }
            DisplayOperation::Add | DisplayOperation::Change => {
                let decr_name = require_decr_name(item)?;
                let header = item
                    .encr_header
                    .as_ref()
                    .ok_or_else(|| unapplyable("no decrypted header for the blob"))?;
                let encr_info = item
                    .encr_info
                    .as_ref()
                    .ok_or_else(|| unapplyable("no encrypted blob to decrypt"))?;
                let encr_modified = encr_info.modified().unwrap_or_else(Timestamp::now);

                // If the log already records exactly this state, the
                // blob was applied before; skip the disk work.
                let target = SyncLogEntry {
                    kind: header.kind,
                    decr_name: decr_name.clone(),
                    decr_modified: header.modified,
                    encr_name: encr_name.clone(),
                    encr_modified,
                };
                if self.log.find_by_decr_name(decr_name.as_str()) == Some(&target) {
                    return Ok(SyncResult::Unchanged);
                }

                if let Some(existing) = self.case_collision(&decr_name)? {
                    return Err(ItemError::CaseOnlyConflict {
                        path: decr_name,
                        existing,
                    });
                }

                let decr_modified = match header.kind {
                    EntryKind::Directory => {
                        let created = match self.decr.try_get_entry(decr_name.as_str())? {
                            Some(existing) => existing,
                            None => self.decr.create_directory(&decr_name)?,
                        };
                        created.modified().unwrap_or(header.modified)
                    }
                    EntryKind::File => {
                        if self.is_what_if() {
                            let ghost = self.decr.what_if_add_file(&decr_name, header.len)?;
                            ghost.modified().unwrap_or(header.modified)
                        } else {
                            let source = self.encr.abs_path(&encr_info.path);
                            let dest = self.decr.abs_path(&decr_name);
                            file::decrypt_file(&source, &dest, &self.key)?;
                            self.decr
                                .refresh_entry(&decr_name)?
                                .and_then(|entry| entry.modified())
                                .unwrap_or(header.modified)
                        }
                    }
                    EntryKind::Removed | EntryKind::Purged => {
                        return Err(unapplyable("tombstone header cannot be materialized"))
                    }
                };

                self.append_log(SyncLogEntry {
                    kind: header.kind,
                    decr_name,
                    decr_modified,
                    encr_name,
                    encr_modified,
                })
            }
            other => Err(unapplyable(format!(
                "operation '{other}' cannot propagate the encrypted side"
            ))),
        }
    }

    /// Append an entry unless the log already ends in an identical state
    /// for that name. The log records outcomes of real syncs only.
    fn append_log(&mut self, entry: SyncLogEntry) -> Result<SyncResult, ItemError> {
        if self.log.find_by_decr_name(entry.decr_name.as_str()) == Some(&entry) {
            return Ok(SyncResult::Unchanged);
        }
        self.log.add(entry)?;
        Ok(SyncResult::Applied)
    }
}

fn require_decr_name(item: &PreSync) -> Result<SyncPath, ItemError> {
    item.decr_name
        .clone()
        .ok_or_else(|| unapplyable("decrypted name is unknown"))
}

fn require_encr_name(item: &PreSync) -> Result<String, ItemError> {
    item.encr_name
        .clone()
        .ok_or_else(|| unapplyable("encrypted name is unknown"))
}

fn finish(item: &PreSync, result: Result<SyncResult, ItemError>) -> SyncResult {
    match result {
        Ok(outcome) => outcome,
        Err(error) => {
            debug!(name = %item.display_name(), error = %error, "item failed");
            SyncResult::Failed(error)
        }
    }
}
