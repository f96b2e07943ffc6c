//! The encrypted side's header file.
//!
//! The header is the only reserved file in an encrypted directory. It is
//! a small JSON document carrying the pair format version, the scrypt
//! salt and cost parameters, and the pair's `DirectoryId` sealed with
//! AES-256-GCM under the derived master key. The seal is what detects a
//! wrong passphrase: decryption is authenticated, so the wrong key fails
//! loudly instead of yielding garbage.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{engine::general_purpose, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::keys::{KdfParams, KeyError, MasterKey};

/// Current pair format version.
pub const PAIR_FILE_VERSION: u16 = 1;

/// Associated data binding the sealed box to its purpose.
const DIRECTORY_ID_AAD: &[u8] = b"helix.directory-id";

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("I/O error on header file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("header file '{}' is malformed: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("unsupported pair format version {found} (supported: {PAIR_FILE_VERSION})")]
    UnsupportedVersion { found: u16 },

    /// The directory-id seal failed to authenticate.
    #[error("wrong passphrase (or tampered header)")]
    WrongPassphrase,

    #[error(transparent)]
    Key(#[from] KeyError),
}

#[derive(Debug, Serialize, Deserialize)]
struct KdfSection {
    salt: String,
    #[serde(flatten)]
    params: KdfParams,
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedBox {
    nonce: String,
    data: String,
}

/// Parsed header file of an encrypted directory.
#[derive(Debug, Serialize, Deserialize)]
pub struct PairHeader {
    file_version: u16,
    kdf: KdfSection,
    directory_id: SealedBox,
}

impl PairHeader {
    /// Create a fresh header for a new pair, deriving and returning the
    /// master key along the way.
    pub fn create(
        directory_id: Uuid,
        passphrase: &str,
    ) -> Result<(PairHeader, MasterKey), HeaderError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let params = KdfParams::default();
        let master_key = MasterKey::derive(passphrase, &salt, &params)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = master_key.with_content_key(|key| {
            let cipher = Aes256Gcm::new(key);
            cipher.encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: directory_id.to_string().as_bytes(),
                    aad: DIRECTORY_ID_AAD,
                },
            )
        });
        let sealed = sealed.map_err(|_| HeaderError::WrongPassphrase)?;

        let header = PairHeader {
            file_version: PAIR_FILE_VERSION,
            kdf: KdfSection {
                salt: general_purpose::STANDARD.encode(salt),
                params,
            },
            directory_id: SealedBox {
                nonce: general_purpose::STANDARD.encode(nonce),
                data: general_purpose::STANDARD.encode(&sealed),
            },
        };
        Ok((header, master_key))
    }

    /// Load and version-check a header file.
    pub fn load(path: &Path) -> Result<PairHeader, HeaderError> {
        let raw = fs::read_to_string(path).map_err(|e| HeaderError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let header: PairHeader =
            serde_json::from_str(&raw).map_err(|e| HeaderError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if header.file_version != PAIR_FILE_VERSION {
            return Err(HeaderError::UnsupportedVersion {
                found: header.file_version,
            });
        }
        Ok(header)
    }

    /// Write the header file atomically.
    pub fn store(&self, path: &Path) -> Result<(), HeaderError> {
        let io_err = |e: io::Error| HeaderError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let json = serde_json::to_string_pretty(self).map_err(|e| HeaderError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let parent = path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        tmp.as_file_mut()
            .write_all(json.as_bytes())
            .and_then(|_| tmp.as_file_mut().write_all(b"\n"))
            .and_then(|_| tmp.as_file_mut().sync_data())
            .map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    #[inline]
    pub fn file_version(&self) -> u16 {
        self.file_version
    }

    /// Derive the master key from `passphrase` and open the directory-id
    /// seal.
    ///
    /// # Errors
    ///
    /// `HeaderError::WrongPassphrase` when the seal fails to
    /// authenticate under the derived key.
    pub fn unlock(&self, passphrase: &str) -> Result<(MasterKey, Uuid), HeaderError> {
        let malformed = |reason: &str| HeaderError::Malformed {
            path: PathBuf::new(),
            reason: reason.to_string(),
        };

        let salt = general_purpose::STANDARD
            .decode(self.kdf.salt.as_bytes())
            .map_err(|_| malformed("salt is not valid base64"))?;
        let master_key = MasterKey::derive(passphrase, &salt, &self.kdf.params)?;

        let nonce = general_purpose::STANDARD
            .decode(self.directory_id.nonce.as_bytes())
            .map_err(|_| malformed("nonce is not valid base64"))?;
        if nonce.len() != NONCE_LEN {
            return Err(malformed("nonce has wrong length"));
        }
        let sealed = general_purpose::STANDARD
            .decode(self.directory_id.data.as_bytes())
            .map_err(|_| malformed("sealed directory id is not valid base64"))?;

        let plaintext = master_key.with_content_key(|key| {
            let cipher = Aes256Gcm::new(key);
            cipher.decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &sealed,
                    aad: DIRECTORY_ID_AAD,
                },
            )
        });
        let plaintext = plaintext.map_err(|_| HeaderError::WrongPassphrase)?;

        let id = std::str::from_utf8(&plaintext)
            .ok()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| malformed("sealed directory id is not a UUID"))?;
        Ok((master_key, id))
    }
}
