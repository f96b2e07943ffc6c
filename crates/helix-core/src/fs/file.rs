//! Per-entry blob codec for the encrypted side.
//!
//! Every logical entry is stored as one authenticated blob:
//!
//! ```text
//! magic    b"HXF1"                          4 bytes
//! version  u16 LE                           blob format version
//! hnonce   96-bit random nonce              12 bytes
//! hlen     u32 LE                           header ciphertext length
//! header   AES-256-GCM(JSON payload)        AAD = magic || version
//! cnonce   96-bit random nonce              12 bytes
//! body     AES-256-GCM(entry content)       AAD = hnonce
//! ```
//!
//! The header payload carries the entry's logical name, kind, last-write
//! time, length, and a random per-blob content key; the master key only
//! ever encrypts headers. Directory markers and tombstones have an empty
//! body. `decrypt_header` reads and authenticates nothing past the header
//! region, which is what lets reconciliation inspect blobs cheaply.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{engine::general_purpose, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, trace};
use zeroize::Zeroizing;

use crate::crypto::keys::MasterKey;

use super::entry::{EntryKind, Timestamp};
use super::path::SyncPath;

pub const BLOB_MAGIC: [u8; 4] = *b"HXF1";
pub const BLOB_VERSION: u16 = 1;

const NONCE_LEN: usize = 12;
/// Upper bound on the header ciphertext; anything larger is corruption.
const MAX_HEADER_LEN: u32 = 64 * 1024;

/// Plaintext metadata recovered from a blob header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// The entry's decrypted relative path.
    pub name: SyncPath,
    pub kind: EntryKind,
    pub modified: Timestamp,
    pub len: u64,
}

/// Options for encrypting one entry into a blob.
#[derive(Debug, Clone)]
pub struct EncryptOptions {
    /// Logical relative path recorded in the header (may differ from the
    /// on-disk name of the source).
    pub name: SyncPath,
    pub kind: EntryKind,
    pub modified: Timestamp,
}

/// On-the-wire header payload. The content key never leaves this module.
#[derive(Serialize, Deserialize)]
struct HeaderPayload {
    name: SyncPath,
    kind: EntryKind,
    modified: Timestamp,
    len: u64,
    content_key: String,
}

#[derive(Error, Debug)]
pub enum FileError {
    #[error("I/O error on blob '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("blob '{}' has an invalid header: {reason}", path.display())]
    InvalidHeader { path: PathBuf, reason: String },

    #[error("blob '{}' has unsupported format version {found}", path.display())]
    UnsupportedVersion { path: PathBuf, found: u16 },

    /// Header authentication failed: tampering or wrong key.
    #[error("failed to decrypt header of blob '{}': authentication failed", path.display())]
    HeaderDecryption { path: PathBuf },

    /// Body authentication failed: tampering or truncation.
    #[error("failed to decrypt content of blob '{}': authentication failed", path.display())]
    ContentDecryption { path: PathBuf },

    /// AEAD encryption failed. Should not happen with valid inputs.
    #[error("failed to encrypt '{name}'")]
    Encryption { name: SyncPath },
}

impl FileError {
    fn io(path: &Path, source: io::Error) -> Self {
        FileError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn header_aad() -> [u8; 6] {
    let mut aad = [0u8; 6];
    aad[..4].copy_from_slice(&BLOB_MAGIC);
    aad[4..].copy_from_slice(&BLOB_VERSION.to_le_bytes());
    aad
}

/// Encrypt one entry into a blob at `dest`.
///
/// `source` is the plaintext file to read; pass `None` for kinds without
/// content (directories, tombstones). The write is atomic: the blob is
/// assembled in a temp file and renamed over `dest`.
///
/// Returns the header that was written.
#[instrument(level = "debug", skip(master_key, options), fields(name = %options.name))]
pub fn encrypt_file(
    source: Option<&Path>,
    dest: &Path,
    master_key: &MasterKey,
    options: &EncryptOptions,
) -> Result<FileHeader, FileError> {
    let content = match source {
        Some(path) if options.kind == EntryKind::File => {
            Zeroizing::new(fs::read(path).map_err(|e| FileError::io(path, e))?)
        }
        _ => Zeroizing::new(Vec::new()),
    };

    let mut content_key = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut *content_key);
    let mut hnonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut hnonce);
    let mut cnonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut cnonce);

    let header = FileHeader {
        name: options.name.clone(),
        kind: options.kind,
        modified: options.modified,
        len: content.len() as u64,
    };

    let payload = HeaderPayload {
        name: header.name.clone(),
        kind: header.kind,
        modified: header.modified,
        len: header.len,
        content_key: general_purpose::STANDARD.encode(&*content_key),
    };
    let payload_json = Zeroizing::new(serde_json::to_vec(&payload).map_err(|_| {
        FileError::Encryption {
            name: options.name.clone(),
        }
    })?);

    let header_ct = master_key.with_content_key(|key| {
        let cipher = Aes256Gcm::new(key);
        cipher.encrypt(
            Nonce::from_slice(&hnonce),
            Payload {
                msg: &payload_json,
                aad: &header_aad(),
            },
        )
    });
    let header_ct = header_ct.map_err(|_| FileError::Encryption {
        name: options.name.clone(),
    })?;

    let body_cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&*content_key));
    let body_ct = body_cipher
        .encrypt(
            Nonce::from_slice(&cnonce),
            Payload {
                msg: &content,
                aad: &hnonce,
            },
        )
        .map_err(|_| FileError::Encryption {
            name: options.name.clone(),
        })?;

    let parent = dest.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| FileError::io(dest, e))?;
    {
        let out = tmp.as_file_mut();
        out.write_all(&BLOB_MAGIC)
            .and_then(|_| out.write_all(&BLOB_VERSION.to_le_bytes()))
            .and_then(|_| out.write_all(&hnonce))
            .and_then(|_| out.write_all(&(header_ct.len() as u32).to_le_bytes()))
            .and_then(|_| out.write_all(&header_ct))
            .and_then(|_| out.write_all(&cnonce))
            .and_then(|_| out.write_all(&body_ct))
            .and_then(|_| out.sync_data())
            .map_err(|e| FileError::io(dest, e))?;
    }
    tmp.persist(dest)
        .map_err(|e| FileError::io(dest, e.error))?;

    trace!(blob = %dest.display(), len = header.len, "encrypted entry");
    Ok(header)
}

/// Decrypt only the header of a blob.
#[instrument(level = "trace", skip(master_key))]
pub fn decrypt_header(source: &Path, master_key: &MasterKey) -> Result<FileHeader, FileError> {
    let mut file = fs::File::open(source).map_err(|e| FileError::io(source, e))?;
    let (payload, _hnonce) = read_header(&mut file, source, master_key)?;
    Ok(FileHeader {
        name: payload.name,
        kind: payload.kind,
        modified: payload.modified,
        len: payload.len,
    })
}

/// Decrypt a blob into the plaintext file at `dest`.
///
/// The destination is written atomically and its last-write time is
/// restored from the header. Returns the decrypted header.
#[instrument(level = "debug", skip(master_key))]
pub fn decrypt_file(
    source: &Path,
    dest: &Path,
    master_key: &MasterKey,
) -> Result<FileHeader, FileError> {
    let mut file = fs::File::open(source).map_err(|e| FileError::io(source, e))?;
    let (payload, hnonce) = read_header(&mut file, source, master_key)?;

    let mut rest = Vec::new();
    file.read_to_end(&mut rest)
        .map_err(|e| FileError::io(source, e))?;
    if rest.len() < NONCE_LEN {
        return Err(FileError::InvalidHeader {
            path: source.to_path_buf(),
            reason: "truncated before content nonce".to_string(),
        });
    }
    let (cnonce, body_ct) = rest.split_at(NONCE_LEN);

    let content_key = Zeroizing::new(
        general_purpose::STANDARD
            .decode(payload.content_key.as_bytes())
            .map_err(|_| FileError::InvalidHeader {
                path: source.to_path_buf(),
                reason: "content key is not valid base64".to_string(),
            })?,
    );
    if content_key.len() != 32 {
        return Err(FileError::InvalidHeader {
            path: source.to_path_buf(),
            reason: "content key has wrong length".to_string(),
        });
    }

    let body_cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&content_key));
    let content = Zeroizing::new(
        body_cipher
            .decrypt(
                Nonce::from_slice(cnonce),
                Payload {
                    msg: body_ct,
                    aad: &hnonce,
                },
            )
            .map_err(|_| FileError::ContentDecryption {
                path: source.to_path_buf(),
            })?,
    );

    let parent = dest.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| FileError::io(dest, e))?;
    tmp.as_file_mut()
        .write_all(&content)
        .and_then(|_| tmp.as_file_mut().sync_data())
        .map_err(|e| FileError::io(dest, e))?;
    tmp.persist(dest)
        .map_err(|e| FileError::io(dest, e.error))?;

    filetime::set_file_mtime(dest, payload.modified.to_file_time())
        .map_err(|e| FileError::io(dest, e))?;

    trace!(blob = %source.display(), len = payload.len, "decrypted entry");
    Ok(FileHeader {
        name: payload.name,
        kind: payload.kind,
        modified: payload.modified,
        len: payload.len,
    })
}

/// Read, authenticate, and parse the header region. Leaves the reader
/// positioned at the content nonce and returns the header nonce, which
/// doubles as the body's associated data.
fn read_header(
    file: &mut fs::File,
    source: &Path,
    master_key: &MasterKey,
) -> Result<(HeaderPayload, [u8; NONCE_LEN]), FileError> {
    let invalid = |reason: &str| FileError::InvalidHeader {
        path: source.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)
        .map_err(|_| invalid("too short for magic"))?;
    if magic != BLOB_MAGIC {
        return Err(invalid("bad magic bytes"));
    }

    let mut version = [0u8; 2];
    file.read_exact(&mut version)
        .map_err(|_| invalid("too short for version"))?;
    let version = u16::from_le_bytes(version);
    if version != BLOB_VERSION {
        return Err(FileError::UnsupportedVersion {
            path: source.to_path_buf(),
            found: version,
        });
    }

    let mut hnonce = [0u8; NONCE_LEN];
    file.read_exact(&mut hnonce)
        .map_err(|_| invalid("too short for header nonce"))?;

    let mut hlen = [0u8; 4];
    file.read_exact(&mut hlen)
        .map_err(|_| invalid("too short for header length"))?;
    let hlen = u32::from_le_bytes(hlen);
    if hlen == 0 || hlen > MAX_HEADER_LEN {
        return Err(invalid("header length out of range"));
    }

    let mut header_ct = vec![0u8; hlen as usize];
    file.read_exact(&mut header_ct)
        .map_err(|_| invalid("truncated header ciphertext"))?;

    let plaintext = master_key.with_content_key(|key| {
        let cipher = Aes256Gcm::new(key);
        cipher.decrypt(
            Nonce::from_slice(&hnonce),
            Payload {
                msg: &header_ct,
                aad: &header_aad(),
            },
        )
    });
    let plaintext = Zeroizing::new(plaintext.map_err(|_| FileError::HeaderDecryption {
        path: source.to_path_buf(),
    })?);

    let payload: HeaderPayload =
        serde_json::from_slice(&plaintext).map_err(|_| invalid("malformed header payload"))?;

    Ok((payload, hnonce))
}
