//! Master key material and passphrase derivation.
//!
//! A pair's master key is two 256-bit subkeys: one for AES-GCM blob
//! headers, one as the MAC half of the AES-SIV name key. Both are derived
//! from the passphrase with scrypt, using the salt and cost parameters
//! stored in the encrypted side's header file.

use aes_gcm::Aes256Gcm;
use generic_array::{typenum::U64, GenericArray};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use zeroize::{Zeroize, Zeroizing};

/// scrypt cost parameters, persisted alongside the salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // Interactive-login strength; matches the cost class the header
        // file records for newly initialized pairs.
        KdfParams {
            log_n: 15,
            r: 8,
            p: 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("invalid key-derivation parameters (log_n={log_n}, r={r}, p={p})")]
    InvalidParams { log_n: u8, r: u32, p: u32 },
}

/// The pair's master key.
///
/// Key bytes are zeroized on drop and only ever exposed through the
/// scoped `with_*` accessors, which hand a cipher-ready key reference to
/// a closure and wipe any combined material afterwards.
pub struct MasterKey {
    /// AES-256 key for blob headers and the encryption half of AES-SIV.
    enc_key: Zeroizing<[u8; 32]>,
    /// MAC half of the AES-SIV name key.
    mac_key: Zeroizing<[u8; 32]>,
}

impl MasterKey {
    pub fn new(enc_key: [u8; 32], mac_key: [u8; 32]) -> Self {
        MasterKey {
            enc_key: Zeroizing::new(enc_key),
            mac_key: Zeroizing::new(mac_key),
        }
    }

    /// Derive a master key from a passphrase.
    ///
    /// The passphrase is NFC-normalized first so that the same visual
    /// passphrase derives the same key on every platform.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidParams` if the stored cost parameters are
    /// rejected by scrypt.
    pub fn derive(passphrase: &str, salt: &[u8], params: &KdfParams) -> Result<Self, KeyError> {
        let normalized: Zeroizing<String> = Zeroizing::new(passphrase.nfc().collect());

        let scrypt_params = scrypt::Params::new(params.log_n, params.r, params.p, 64).map_err(
            |_| KeyError::InvalidParams {
                log_n: params.log_n,
                r: params.r,
                p: params.p,
            },
        )?;

        let mut derived = Zeroizing::new([0u8; 64]);
        scrypt::scrypt(normalized.as_bytes(), salt, &scrypt_params, &mut *derived).map_err(
            |_| KeyError::InvalidParams {
                log_n: params.log_n,
                r: params.r,
                p: params.p,
            },
        )?;

        let mut enc_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        enc_key.copy_from_slice(&derived[..32]);
        mac_key.copy_from_slice(&derived[32..]);
        Ok(MasterKey::new(enc_key, mac_key))
    }

    /// Execute a closure with the 512-bit AES-SIV name key.
    ///
    /// The combined key is laid out `[mac_key || enc_key]`, the order the
    /// `aes-siv` crate expects, and is wiped when the closure returns.
    pub fn with_siv_key<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&GenericArray<u8, U64>) -> R,
    {
        struct WipeOnDrop(GenericArray<u8, U64>);
        impl Drop for WipeOnDrop {
            fn drop(&mut self) {
                self.0.as_mut_slice().zeroize();
            }
        }

        let mut combined = WipeOnDrop(GenericArray::default());
        combined.0[..32].copy_from_slice(&*self.mac_key);
        combined.0[32..].copy_from_slice(&*self.enc_key);
        f(&combined.0)
    }

    /// Execute a closure with the AES-256-GCM header key.
    pub fn with_content_key<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&aes_gcm::Key<Aes256Gcm>) -> R,
    {
        f(aes_gcm::Key::<Aes256Gcm>::from_slice(&*self.enc_key))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("MasterKey").finish_non_exhaustive()
    }
}
