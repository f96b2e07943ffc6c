//! Paired directory state: one decrypted tree, one encrypted mirror.
//!
//! `DirectoryPair` owns everything a sync run needs: both cached trees,
//! the sync log, the master key, and the randomness source for the
//! dependency sorter. Opening acquires all of it together; any failure
//! on the way releases whatever was already acquired.

pub mod header;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::crypto::keys::{KeyError, MasterKey};
use crate::fs::entry::EntryKind;
use crate::fs::file::decrypt_header;
use crate::fs::name::encode_name;
use crate::fs::path::{CaseSensitivity, SyncPath};
use crate::fs::tree::{FsError, FsTree};
use crate::sync::item::{PreSync, SyncMode};
use crate::sync::log::{LogError, SyncLog};
use crate::sync::{classify, matcher, order, SyncError};

pub use header::{HeaderError, PairHeader, PAIR_FILE_VERSION};

/// Reserved header file at the root of the encrypted side.
pub const HEADER_FILE_NAME: &str = ".helix.hx";
/// Reserved metadata subdirectory at the root of the decrypted side.
pub const META_DIR_NAME: &str = ".helix";
/// Directory-id file inside the metadata subdirectory.
pub const DIRECTORY_ID_FILE: &str = "directory-id";
/// Sync log file inside the metadata subdirectory.
pub const SYNC_LOG_FILE: &str = "sync.log";

#[derive(Error, Debug)]
pub enum PairError {
    #[error("'{}' is not an initialized encrypted directory (missing {HEADER_FILE_NAME})", path.display())]
    MissingHeader { path: PathBuf },

    #[error("'{}' is not an initialized decrypted directory (missing {META_DIR_NAME}/)", path.display())]
    MissingMeta { path: PathBuf },

    #[error("'{}' is already part of an initialized pair", path.display())]
    AlreadyInitialized { path: PathBuf },

    #[error("directory id mismatch: decrypted side has {decrypted}, encrypted side has {encrypted}")]
    DirectoryIdMismatch { decrypted: Uuid, encrypted: Uuid },

    #[error("directory id file '{}' is malformed", path.display())]
    InvalidDirectoryId { path: PathBuf },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Log(#[from] LogError),
}

impl PairError {
    fn io(path: &Path, source: io::Error) -> Self {
        PairError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Options for opening a pair.
#[derive(Debug, Clone)]
pub struct PairOptions {
    pub decrypted_root: PathBuf,
    pub encrypted_root: PathBuf,
    pub passphrase: String,
    /// Dry-run mode: plan and classify without touching the disk.
    pub what_if: bool,
    /// Override the per-side filesystem probe (mainly for tests).
    pub case_sensitivity: Option<CaseSensitivity>,
}

impl PairOptions {
    pub fn new(
        decrypted_root: impl Into<PathBuf>,
        encrypted_root: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        PairOptions {
            decrypted_root: decrypted_root.into(),
            encrypted_root: encrypted_root.into(),
            passphrase: passphrase.into(),
            what_if: false,
            case_sensitivity: None,
        }
    }

    pub fn what_if(mut self, what_if: bool) -> Self {
        self.what_if = what_if;
        self
    }

    pub fn case_sensitivity(mut self, case: CaseSensitivity) -> Self {
        self.case_sensitivity = Some(case);
        self
    }
}

/// An opened pair of directories plus their sync log.
pub struct DirectoryPair {
    pub(crate) decr: FsTree,
    pub(crate) encr: FsTree,
    pub(crate) log: SyncLog,
    pub(crate) key: MasterKey,
    pub(crate) rng: StdRng,
    directory_id: Uuid,
    what_if: bool,
}

impl DirectoryPair {
    /// Initialize a fresh pair over two existing directories.
    ///
    /// Writes the encrypted side's header file and the decrypted side's
    /// metadata directory. Fails if either side already carries pair
    /// state.
    #[instrument(skip(passphrase))]
    pub fn init(
        decrypted_root: &Path,
        encrypted_root: &Path,
        passphrase: &str,
    ) -> Result<Uuid, PairError> {
        let header_path = encrypted_root.join(HEADER_FILE_NAME);
        if header_path.exists() {
            return Err(PairError::AlreadyInitialized {
                path: encrypted_root.to_path_buf(),
            });
        }
        let meta_dir = decrypted_root.join(META_DIR_NAME);
        if meta_dir.exists() {
            return Err(PairError::AlreadyInitialized {
                path: decrypted_root.to_path_buf(),
            });
        }

        let directory_id = Uuid::new_v4();
        let (header, _master_key) = PairHeader::create(directory_id, passphrase)?;
        header.store(&header_path)?;

        fs::create_dir(&meta_dir).map_err(|e| PairError::io(&meta_dir, e))?;
        let id_path = meta_dir.join(DIRECTORY_ID_FILE);
        fs::write(&id_path, format!("{directory_id}\n")).map_err(|e| PairError::io(&id_path, e))?;

        info!(%directory_id, "initialized directory pair");
        Ok(directory_id)
    }

    /// Open an initialized pair.
    ///
    /// Validates the header, derives the master key, checks that both
    /// sides carry the same `DirectoryId`, detects each side's case
    /// rule, loads the sync log, and roots both cached trees.
    #[instrument(skip(options), fields(decr = %options.decrypted_root.display(), encr = %options.encrypted_root.display()))]
    pub fn open(options: PairOptions) -> Result<Self, PairError> {
        let header_path = options.encrypted_root.join(HEADER_FILE_NAME);
        if !header_path.exists() {
            return Err(PairError::MissingHeader {
                path: options.encrypted_root.clone(),
            });
        }
        let header = PairHeader::load(&header_path)?;
        let (key, encrypted_id) = header.unlock(&options.passphrase)?;

        let meta_dir = options.decrypted_root.join(META_DIR_NAME);
        let id_path = meta_dir.join(DIRECTORY_ID_FILE);
        let raw_id = match fs::read_to_string(&id_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PairError::MissingMeta {
                    path: options.decrypted_root.clone(),
                })
            }
            Err(e) => return Err(PairError::io(&id_path, e)),
        };
        let decrypted_id = Uuid::parse_str(raw_id.trim()).map_err(|_| {
            PairError::InvalidDirectoryId {
                path: id_path.clone(),
            }
        })?;
        if decrypted_id != encrypted_id {
            return Err(PairError::DirectoryIdMismatch {
                decrypted: decrypted_id,
                encrypted: encrypted_id,
            });
        }

        let decr_case = match options.case_sensitivity {
            Some(case) => case,
            None => CaseSensitivity::detect(&options.decrypted_root)
                .map_err(|e| PairError::io(&options.decrypted_root, e))?,
        };
        let encr_case = match options.case_sensitivity {
            Some(case) => case,
            None => CaseSensitivity::detect(&options.encrypted_root)
                .map_err(|e| PairError::io(&options.encrypted_root, e))?,
        };
        debug!(?decr_case, ?encr_case, "case sensitivity");

        let decr = FsTree::new_root(&options.decrypted_root, decr_case, options.what_if)?;
        let encr = FsTree::new_root(&options.encrypted_root, encr_case, options.what_if)?;
        let log = SyncLog::open(meta_dir.join(SYNC_LOG_FILE), options.what_if)?;

        Ok(DirectoryPair {
            decr,
            encr,
            log,
            key,
            rng: StdRng::from_entropy(),
            directory_id: encrypted_id,
            what_if: options.what_if,
        })
    }

    #[inline]
    pub fn directory_id(&self) -> Uuid {
        self.directory_id
    }

    #[inline]
    pub fn decrypted_root(&self) -> &Path {
        self.decr.root_path()
    }

    #[inline]
    pub fn encrypted_root(&self) -> &Path {
        self.encr.root_path()
    }

    #[inline]
    pub fn is_what_if(&self) -> bool {
        self.what_if
    }

    /// The loaded sync log.
    #[inline]
    pub fn log(&self) -> &SyncLog {
        &self.log
    }

    /// Re-read filesystem state and reload the log, keeping keys and
    /// configuration.
    pub fn reset(&mut self) -> Result<(), PairError> {
        self.decr.reset()?;
        self.encr.reset()?;
        self.log.reload()?;
        Ok(())
    }

    /// Compute the ordered, classified set of operations that converges
    /// the pair.
    ///
    /// Matches the three sources, classifies each record, fetches blob
    /// headers for records that may act, re-classifies with the headers
    /// in hand, and orders the changed records for application. Entries
    /// that did not change are dropped from the result.
    #[instrument(skip(self))]
    pub fn find_changes(&mut self) -> Result<Vec<PreSync>, SyncError> {
        let mut items = matcher::assemble(&mut self.decr, &mut self.encr, &self.log, &self.key)?;

        for item in &mut items {
            classify::classify(item);
        }

        // Fetch headers for records that might act on them. A blob whose
        // header cannot be read (or whose name does not round-trip) is
        // surfaced as an error item; the run continues without it.
        let mut failed = vec![false; items.len()];
        for (i, item) in items.iter_mut().enumerate() {
            if item.mode == SyncMode::Unchanged {
                continue;
            }
            let Some(info) = &item.encr_info else { continue };
            if info.kind() != EntryKind::File || item.encr_header.is_some() {
                continue;
            }
            let blob_path = self.encr.abs_path(&info.path);
            match decrypt_header(&blob_path, &self.key) {
                Ok(header) => {
                    let reencoded = encode_name(&header.name, &self.key).map_err(SyncError::Name)?;
                    let blob_name = item.encr_name.as_deref().unwrap_or_default();
                    if reencoded != blob_name {
                        warn!(
                            blob = %info.path,
                            header_name = %header.name,
                            "blob header name does not round-trip to its filename"
                        );
                        failed[i] = true;
                    } else {
                        if item.decr_name.is_none() {
                            item.decr_name = Some(header.name.clone());
                        }
                        item.encr_header = Some(header);
                    }
                }
                Err(e) => {
                    warn!(blob = %info.path, error = %e, "failed to decrypt blob header");
                    failed[i] = true;
                }
            }
        }

        for (i, item) in items.iter_mut().enumerate() {
            if failed[i] {
                item.mode = SyncMode::Unknown;
            } else {
                classify::classify(item);
            }
            classify::assign_display(item);
        }

        items.retain(|item| item.mode != SyncMode::Unchanged);
        debug!(changed = items.len(), "classified changes");

        order::order_items(items, self.decr.case(), &mut self.rng)
    }

    /// Whether the decrypted side already holds `path` under a different
    /// case. Used by the executor before materializing encrypted-side
    /// entries.
    pub(crate) fn case_collision(&mut self, path: &SyncPath) -> Result<Option<SyncPath>, FsError> {
        if self.decr.case() == CaseSensitivity::Sensitive {
            return Ok(None);
        }
        match self.decr.try_get_entry(path.as_str())? {
            Some(existing) if existing.path.as_str() != path.as_str() => Ok(Some(existing.path)),
            _ => Ok(None),
        }
    }
}

impl std::fmt::Debug for DirectoryPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryPair")
            .field("decrypted_root", &self.decr.root_path())
            .field("encrypted_root", &self.encr.root_path())
            .field("directory_id", &self.directory_id)
            .field("what_if", &self.what_if)
            .finish_non_exhaustive()
    }
}
