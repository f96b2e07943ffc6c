//! Shared fixtures: real directory pairs in temp directories.

use std::fs;
use std::path::{Path, PathBuf};

use helix_core::crypto::keys::MasterKey;
use helix_core::pair::{
    PairHeader, DIRECTORY_ID_FILE, HEADER_FILE_NAME, META_DIR_NAME, SYNC_LOG_FILE,
};
use helix_core::sync::SyncResult;
use helix_core::{CaseSensitivity, DirectoryPair, PairOptions};
use tempfile::TempDir;

pub const TEST_PASSPHRASE: &str = "test-passphrase-12345";

/// One initialized pair living in two temp directories.
pub struct TestPair {
    pub decr: TempDir,
    pub encr: TempDir,
}

impl TestPair {
    pub fn new() -> Self {
        let decr = tempfile::tempdir().unwrap();
        let encr = tempfile::tempdir().unwrap();
        DirectoryPair::init(decr.path(), encr.path(), TEST_PASSPHRASE).unwrap();
        TestPair { decr, encr }
    }

    pub fn open(&self) -> DirectoryPair {
        self.open_with(false, None)
    }

    pub fn open_what_if(&self) -> DirectoryPair {
        self.open_with(true, None)
    }

    pub fn open_case_insensitive(&self) -> DirectoryPair {
        self.open_with(false, Some(CaseSensitivity::Insensitive))
    }

    fn open_with(&self, what_if: bool, case: Option<CaseSensitivity>) -> DirectoryPair {
        let mut options = PairOptions::new(self.decr.path(), self.encr.path(), TEST_PASSPHRASE)
            .what_if(what_if);
        if let Some(case) = case {
            options = options.case_sensitivity(case);
        }
        DirectoryPair::open(options).unwrap()
    }

    pub fn decr_path(&self, rel: &str) -> PathBuf {
        self.decr.path().join(rel)
    }

    /// Write a decrypted-side file, creating parent directories.
    pub fn write_decr(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.decr_path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn read_decr(&self, rel: &str) -> Vec<u8> {
        fs::read(self.decr_path(rel)).unwrap()
    }

    pub fn set_decr_mtime(&self, rel: &str, millis: u64) {
        set_mtime(&self.decr_path(rel), millis);
    }

    /// The number of blobs on the encrypted side (the header file does
    /// not count).
    pub fn encr_blob_count(&self) -> usize {
        fs::read_dir(self.encr.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy() != HEADER_FILE_NAME)
            .count()
    }

    /// The obfuscated blob name last logged for a decrypted path.
    pub fn logged_encr_name(&self, decr_name: &str) -> String {
        let pair = self.open();
        pair.log()
            .find_by_decr_name(decr_name)
            .unwrap_or_else(|| panic!("no log entry for '{decr_name}'"))
            .encr_name
            .clone()
    }

    /// Unlock the pair's master key directly from the header file.
    pub fn master_key(&self) -> MasterKey {
        let header = PairHeader::load(&self.encr.path().join(HEADER_FILE_NAME)).unwrap();
        let (key, _id) = header.unlock(TEST_PASSPHRASE).unwrap();
        key
    }

    /// Forget the sync history, as if only the directories survived.
    pub fn wipe_log(&self) {
        let log = self.decr.path().join(META_DIR_NAME).join(SYNC_LOG_FILE);
        if log.exists() {
            fs::remove_file(log).unwrap();
        }
    }

    /// Remove every decrypted entry except the reserved metadata.
    pub fn wipe_decr_contents(&self) {
        for entry in fs::read_dir(self.decr.path()).unwrap() {
            let entry = entry.unwrap();
            if entry.file_name().to_string_lossy() == META_DIR_NAME {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(path).unwrap();
            } else {
                fs::remove_file(path).unwrap();
            }
        }
    }
}

/// A second decrypted replica attached to an existing encrypted mirror.
///
/// Carries the same `DirectoryId` but its own (initially empty) sync
/// log, like a restore onto a second machine.
pub struct Replica {
    pub decr: TempDir,
    encr_root: PathBuf,
}

impl TestPair {
    pub fn replica(&self) -> Replica {
        let decr = tempfile::tempdir().unwrap();
        let meta = decr.path().join(META_DIR_NAME);
        fs::create_dir(&meta).unwrap();
        fs::copy(
            self.decr.path().join(META_DIR_NAME).join(DIRECTORY_ID_FILE),
            meta.join(DIRECTORY_ID_FILE),
        )
        .unwrap();
        Replica {
            decr,
            encr_root: self.encr.path().to_path_buf(),
        }
    }
}

impl Replica {
    pub fn open(&self) -> DirectoryPair {
        DirectoryPair::open(PairOptions::new(
            self.decr.path(),
            &self.encr_root,
            TEST_PASSPHRASE,
        ))
        .unwrap()
    }

    pub fn decr_path(&self, rel: &str) -> PathBuf {
        self.decr.path().join(rel)
    }

    pub fn write_decr(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.decr_path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn set_decr_mtime(&self, rel: &str, millis: u64) {
        set_mtime(&self.decr_path(rel), millis);
    }

    pub fn read_decr(&self, rel: &str) -> Vec<u8> {
        fs::read(self.decr_path(rel)).unwrap()
    }
}

pub fn set_mtime(path: &Path, millis: u64) {
    let time = filetime::FileTime::from_unix_time(
        (millis / 1000) as i64,
        ((millis % 1000) * 1_000_000) as u32,
    );
    filetime::set_file_mtime(path, time).unwrap();
}

/// Run a full sync: find changes, apply each in order, panic on any
/// per-item failure.
pub fn run_sync(pair: &mut DirectoryPair) -> usize {
    let items = pair.find_changes().unwrap();
    let count = items.len();
    for item in &items {
        if let SyncResult::Failed(error) = pair.try_sync(item) {
            panic!("sync of '{}' failed: {error}", item.display_name());
        }
    }
    count
}

/// Assert that a subsequent discovery finds nothing left to do.
pub fn assert_quiescent(pair: &mut DirectoryPair) {
    let leftover = pair.find_changes().unwrap();
    assert!(
        leftover.is_empty(),
        "expected quiescent pair, found: {:?}",
        leftover
            .iter()
            .map(|i| (i.display_name(), i.mode, i.operation))
            .collect::<Vec<_>>()
    );
}
