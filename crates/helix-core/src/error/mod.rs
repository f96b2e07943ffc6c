//! Error types for the helix-core crate.
//!
//! This module re-exports every error type so callers have one place to
//! import them from.

pub use crate::crypto::keys::KeyError;
pub use crate::fs::file::FileError;
pub use crate::fs::name::NameError;
pub use crate::fs::tree::FsError;
pub use crate::pair::{HeaderError, PairError};
pub use crate::sync::execute::ItemError;
pub use crate::sync::log::LogError;
pub use crate::sync::SyncError;
