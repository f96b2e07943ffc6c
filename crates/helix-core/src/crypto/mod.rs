//! Key material and derivation.

pub mod keys;

pub use keys::{KdfParams, KeyError, MasterKey};
