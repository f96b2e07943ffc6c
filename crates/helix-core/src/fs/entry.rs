//! Entries and timestamps shared by both sides of a pair.

use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::path::SyncPath;

/// Millisecond-precision UTC timestamp.
///
/// All last-write times in the engine are carried as milliseconds since
/// the Unix epoch. The encrypted side stores times at this resolution,
/// which is what makes the executor's 1 s minimum-advance rule on
/// successive overwrites expressible (see the sync executor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    /// The current time.
    pub fn now() -> Self {
        SystemTime::now().into()
    }

    #[inline]
    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    #[inline]
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.0)
    }

    pub fn to_file_time(self) -> FileTime {
        FileTime::from_system_time(self.to_system_time())
    }

    /// This timestamp advanced by `millis`.
    pub fn plus_millis(self, millis: u64) -> Self {
        Timestamp(self.0.saturating_add(millis))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        let millis = t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Flat entry kind, used in log records, blob headers, and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    /// Tombstone: the entry used to exist and has been removed.
    Removed,
    /// A stale tombstone reconciled against the log without disk I/O.
    Purged,
}

impl EntryKind {
    /// Whether this kind denotes an entry that exists on disk.
    #[inline]
    pub fn is_present(&self) -> bool {
        matches!(self, EntryKind::File | EntryKind::Directory)
    }

    /// Whether this kind is a tombstone of either flavor.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        !self.is_present()
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
            EntryKind::Removed => "removed",
            EntryKind::Purged => "purged",
        };
        write!(f, "{s}")
    }
}

/// The state of one entry, with each variant carrying exactly the fields
/// that exist for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryData {
    File { modified: Timestamp, len: u64 },
    Directory { modified: Timestamp },
    Removed,
    Purged,
}

impl EntryData {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let modified = metadata
            .modified()
            .map(Timestamp::from)
            .unwrap_or(Timestamp::EPOCH);
        if metadata.is_dir() {
            EntryData::Directory { modified }
        } else {
            EntryData::File {
                modified,
                len: metadata.len(),
            }
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            EntryData::File { .. } => EntryKind::File,
            EntryData::Directory { .. } => EntryKind::Directory,
            EntryData::Removed => EntryKind::Removed,
            EntryData::Purged => EntryKind::Purged,
        }
    }

    /// Last-write time, if the entry exists.
    pub fn modified(&self) -> Option<Timestamp> {
        match self {
            EntryData::File { modified, .. } | EntryData::Directory { modified } => Some(*modified),
            EntryData::Removed | EntryData::Purged => None,
        }
    }

    /// Content length; zero for anything but a file.
    pub fn len(&self) -> u64 {
        match self {
            EntryData::File { len, .. } => *len,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Snapshot of one cached tree entry.
///
/// Snapshots are small owned values: the reconciliation records hold them
/// across executor mutations of the live tree, so they deliberately do not
/// borrow from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub path: SyncPath,
    pub data: EntryData,
}

impl FsEntry {
    pub fn new(path: SyncPath, data: EntryData) -> Self {
        FsEntry { path, data }
    }

    #[inline]
    pub fn kind(&self) -> EntryKind {
        self.data.kind()
    }

    #[inline]
    pub fn modified(&self) -> Option<Timestamp> {
        self.data.modified()
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn name(&self) -> &str {
        self.path.file_name().unwrap_or("")
    }
}
