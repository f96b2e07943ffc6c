//! Helix: synchronization between a plaintext directory tree and an
//! encrypted mirror directory.
//!
//! The encrypted side stores every logical entry (files and directories
//! alike) as one flat, individually-encrypted, authenticated blob whose
//! filename is an opaque, key-bound encoding of the entry's relative
//! path. A holder of the passphrase and the encrypted directory can
//! recover the tree; anyone else learns at most the number of entries
//! and their ciphertext sizes.
//!
//! The heart of the crate is the three-way reconciliation engine in
//! [`sync`]: it joins the decrypted tree, the encrypted mirror, and the
//! append-only sync log into classified, dependency-ordered operations,
//! which [`DirectoryPair::try_sync`] applies one at a time.
//!
//! ```no_run
//! use helix_core::{DirectoryPair, PairOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pair = DirectoryPair::open(PairOptions::new(
//!     "/home/me/notes",
//!     "/mnt/cloud/notes.encrypted",
//!     "correct horse battery staple",
//! ))?;
//!
//! for item in pair.find_changes()? {
//!     let result = pair.try_sync(&item);
//!     println!("{} {}: {result:?}", item.operation, item.display_name());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod crypto;
pub mod error;
pub mod fs;
pub mod pair;
pub mod sync;

// Re-export the common surface at the crate root.
pub use crypto::keys::MasterKey;
pub use fs::entry::{EntryKind, Timestamp};
pub use fs::path::{CaseSensitivity, SyncPath};
pub use pair::{DirectoryPair, PairError, PairOptions};
pub use sync::{
    DisplayOperation, PreSync, SyncError, SyncMode, SyncResult, SyncSide,
};
