//! Append-only log of the last-known synced state per logical path.
//!
//! The log lives on the decrypted side as a JSON-lines file: one record
//! per line, five fields, newline terminator. Appends go to memory and
//! disk together (append, then fsync); full rewrites are atomic
//! (temp file, rename). In what-if mode the disk copy is left untouched
//! and appends land only in memory, to be discarded by the next reload.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::fs::entry::{EntryKind, Timestamp};
use crate::fs::path::SyncPath;

/// One immutable record of a successfully synced state.
///
/// `kind == Removed` encodes a tombstone: the names are the names that
/// used to exist, the times record when the removal was reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub kind: EntryKind,
    pub decr_name: SyncPath,
    pub decr_modified: Timestamp,
    pub encr_name: String,
    pub encr_modified: Timestamp,
}

#[derive(Error, Debug)]
pub enum LogError {
    #[error("I/O error on sync log '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sync log '{}' is corrupt at line {line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl LogError {
    fn io(path: &Path, source: io::Error) -> Self {
        LogError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// In-memory sync log backed by one file on the decrypted side.
#[derive(Debug)]
pub struct SyncLog {
    path: PathBuf,
    what_if: bool,
    entries: Vec<SyncLogEntry>,
    /// Decrypted name -> position of the most recent entry for it.
    index: HashMap<String, usize>,
}

impl SyncLog {
    /// Open (and fully load) the log at `path`. A missing file is an
    /// empty log; it is created on first append.
    pub fn open(path: impl Into<PathBuf>, what_if: bool) -> Result<Self, LogError> {
        let mut log = SyncLog {
            path: path.into(),
            what_if,
            entries: Vec::new(),
            index: HashMap::new(),
        };
        log.reload()?;
        Ok(log)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a record to memory and, outside what-if mode, to disk.
    pub fn add(&mut self, entry: SyncLogEntry) -> Result<(), LogError> {
        if !self.what_if {
            let mut line = serde_json::to_vec(&entry).map_err(|e| LogError::Parse {
                path: self.path.clone(),
                line: self.entries.len() + 1,
                reason: e.to_string(),
            })?;
            line.push(b'\n');

            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| LogError::io(&self.path, e))?;
            file.write_all(&line)
                .and_then(|_| file.sync_data())
                .map_err(|e| LogError::io(&self.path, e))?;
        }

        trace!(name = %entry.decr_name, kind = %entry.kind, what_if = self.what_if, "log append");
        self.index
            .insert(entry.decr_name.as_str().to_string(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Re-read the log from disk, discarding in-memory state (including
    /// any what-if ghosts) and rebuilding the name index with the last
    /// occurrence per name winning.
    pub fn reload(&mut self) -> Result<(), LogError> {
        self.entries.clear();
        self.index.clear();

        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(LogError::io(&self.path, e)),
        };

        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| LogError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: SyncLogEntry =
                serde_json::from_str(&line).map_err(|e| LogError::Parse {
                    path: self.path.clone(),
                    line: number + 1,
                    reason: e.to_string(),
                })?;
            self.index
                .insert(entry.decr_name.as_str().to_string(), self.entries.len());
            self.entries.push(entry);
        }
        debug!(entries = self.entries.len(), "sync log loaded");
        Ok(())
    }

    /// The most recent entry for a decrypted name, if any.
    pub fn find_by_decr_name(&self, name: &str) -> Option<&SyncLogEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// All records, oldest first.
    pub fn entries(&self) -> &[SyncLogEntry] {
        &self.entries
    }

    /// The most recent entry per decrypted name, in the order the names
    /// first appeared in the log.
    pub fn latest_entries(&self) -> impl Iterator<Item = &SyncLogEntry> {
        let mut seen = std::collections::HashSet::new();
        self.entries.iter().filter_map(move |entry| {
            let name = entry.decr_name.as_str();
            if seen.insert(name.to_string()) {
                Some(&self.entries[self.index[name]])
            } else {
                None
            }
        })
    }

    /// Rewrite the log keeping only the most recent entry per name.
    ///
    /// The replacement is atomic: the compacted log is written to a temp
    /// file beside the original and renamed over it.
    pub fn compact(&mut self) -> Result<(), LogError> {
        let survivors: Vec<SyncLogEntry> = self.latest_entries().cloned().collect();

        if !self.what_if {
            let parent = self.path.parent().unwrap_or(Path::new("."));
            let mut tmp = tempfile::NamedTempFile::new_in(parent)
                .map_err(|e| LogError::io(&self.path, e))?;
            for entry in &survivors {
                let mut line = serde_json::to_vec(entry).map_err(|e| LogError::Parse {
                    path: self.path.clone(),
                    line: 0,
                    reason: e.to_string(),
                })?;
                line.push(b'\n');
                tmp.as_file_mut()
                    .write_all(&line)
                    .map_err(|e| LogError::io(&self.path, e))?;
            }
            tmp.as_file_mut()
                .sync_data()
                .map_err(|e| LogError::io(&self.path, e))?;
            tmp.persist(&self.path)
                .map_err(|e| LogError::io(&self.path, e.error))?;
        }

        debug!(before = self.entries.len(), after = survivors.len(), "sync log compacted");
        self.entries = survivors;
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.decr_name.as_str().to_string(), i))
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, decr_ms: u64, encr_ms: u64) -> SyncLogEntry {
        SyncLogEntry {
            kind: EntryKind::File,
            decr_name: SyncPath::new(name),
            decr_modified: Timestamp::from_millis(decr_ms),
            encr_name: format!("enc-{name}"),
            encr_modified: Timestamp::from_millis(encr_ms),
        }
    }

    #[test]
    fn test_append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");

        let mut log = SyncLog::open(&path, false).unwrap();
        log.add(entry("a.txt", 1, 2)).unwrap();
        log.add(entry("b.txt", 3, 4)).unwrap();
        log.add(entry("a.txt", 5, 6)).unwrap();

        let mut reloaded = SyncLog::open(&path, false).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(
            reloaded.find_by_decr_name("a.txt").unwrap().decr_modified,
            Timestamp::from_millis(5)
        );
        assert_eq!(
            reloaded.find_by_decr_name("b.txt").unwrap().decr_modified,
            Timestamp::from_millis(3)
        );
        assert!(reloaded.find_by_decr_name("c.txt").is_none());

        reloaded.reload().unwrap();
        assert_eq!(reloaded.len(), 3);
    }

    #[test]
    fn test_missing_file_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = SyncLog::open(dir.path().join("absent.log"), false).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_what_if_appends_stay_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");

        let mut log = SyncLog::open(&path, true).unwrap();
        log.add(entry("ghost.txt", 1, 2)).unwrap();
        assert_eq!(log.len(), 1);
        assert!(!path.exists());

        log.reload().unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_latest_entries_order_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = SyncLog::open(dir.path().join("sync.log"), false).unwrap();
        log.add(entry("a", 1, 1)).unwrap();
        log.add(entry("b", 2, 2)).unwrap();
        log.add(entry("a", 3, 3)).unwrap();

        let latest: Vec<_> = log.latest_entries().collect();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].decr_name, SyncPath::new("a"));
        assert_eq!(latest[0].decr_modified, Timestamp::from_millis(3));
        assert_eq!(latest[1].decr_name, SyncPath::new("b"));
    }

    #[test]
    fn test_compact_keeps_only_latest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");
        let mut log = SyncLog::open(&path, false).unwrap();
        log.add(entry("a", 1, 1)).unwrap();
        log.add(entry("a", 2, 2)).unwrap();
        log.add(entry("b", 3, 3)).unwrap();

        log.compact().unwrap();
        assert_eq!(log.len(), 2);

        let reloaded = SyncLog::open(&path, false).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.find_by_decr_name("a").unwrap().decr_modified,
            Timestamp::from_millis(2)
        );
    }

    #[test]
    fn test_corrupt_line_is_reported_with_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");
        let mut log = SyncLog::open(&path, false).unwrap();
        log.add(entry("a", 1, 1)).unwrap();
        fs::write(&path, format!("{}\nnot json\n", fs::read_to_string(&path).unwrap().trim())).unwrap();

        let err = SyncLog::open(&path, false).unwrap_err();
        match err {
            LogError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_removed_tombstone_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");
        let mut log = SyncLog::open(&path, false).unwrap();
        log.add(SyncLogEntry {
            kind: EntryKind::Removed,
            decr_name: SyncPath::new("gone.txt"),
            decr_modified: Timestamp::from_millis(10),
            encr_name: "enc-gone".to_string(),
            encr_modified: Timestamp::from_millis(11),
        })
        .unwrap();

        let reloaded = SyncLog::open(&path, false).unwrap();
        let tomb = reloaded.find_by_decr_name("gone.txt").unwrap();
        assert_eq!(tomb.kind, EntryKind::Removed);
        assert_eq!(tomb.encr_name, "enc-gone");
    }
}
