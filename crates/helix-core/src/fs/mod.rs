//! Filesystem model: universal paths, cached trees, and the per-entry
//! blob and name codecs.

pub mod entry;
pub mod file;
pub mod name;
pub mod path;
pub mod tree;

pub use entry::{EntryData, EntryKind, FsEntry, Timestamp};
pub use file::{decrypt_file, decrypt_header, encrypt_file, EncryptOptions, FileHeader};
pub use name::{decode_name, encode_name};
pub use path::{CaseSensitivity, SyncPath};
pub use tree::{EntryScope, FsTree};
