//! Obfuscated filename encoding.
//!
//! Every logical entry of the decrypted tree maps to exactly one flat
//! file on the encrypted side whose name is the deterministic, key-bound
//! encoding of the entry's universal relative path: AES-SIV over the
//! NFC-normalized path, Base64URL-encoded. Determinism keeps the mapping
//! stable across runs; AES-SIV authentication makes decoding reject names
//! produced under another key.
//!
//! Encoded names are pure Base64URL and therefore never start with `.`,
//! so they cannot collide with the reserved header file.

use aes_siv::{siv::Aes256Siv, KeyInit};
use base64::{engine::general_purpose, Engine as _};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::crypto::keys::MasterKey;

use super::path::SyncPath;

/// Errors from encoding or decoding obfuscated names.
///
/// Decoding failures are integrity signals: AES-SIV is authenticated, so
/// a name that fails to decode was not produced under this pair's key.
#[derive(Error, Debug)]
pub enum NameError {
    /// AES-SIV encryption failed. Should not happen with valid inputs.
    #[error("failed to encode name '{name}'")]
    EncodingFailed { name: String },

    /// The encoded name is not valid Base64URL.
    #[error("invalid base64 in encoded name '{name}': {reason}")]
    Base64Decode { name: String, reason: String },

    /// AES-SIV authentication failed: tampered name or wrong key.
    #[error("failed to decode name '{name}': authentication failed - tampering or wrong key")]
    DecodingFailed { name: String },

    /// The decoded bytes are not valid UTF-8.
    #[error("decoded name '{name}' is not valid UTF-8: {reason}")]
    Utf8Decode { name: String, reason: String },
}

/// Encode a decrypted relative path into its obfuscated filename.
///
/// The path is NFC-normalized before encryption so that both composed and
/// decomposed spellings of the same path map to the same blob.
pub fn encode_name(path: &SyncPath, master_key: &MasterKey) -> Result<String, NameError> {
    let normalized: String = path.as_str().nfc().collect();

    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let associated_data: &[&[u8]] = &[];
        let encrypted = cipher
            .encrypt(associated_data, normalized.as_bytes())
            .map_err(|_| NameError::EncodingFailed {
                name: path.as_str().to_string(),
            })?;
        Ok(general_purpose::URL_SAFE.encode(&encrypted))
    })
}

/// Decode an obfuscated filename back into the decrypted relative path.
///
/// Accepts both padded and unpadded Base64URL so that blobs renamed by
/// tools which strip padding remain readable.
pub fn decode_name(encoded: &str, master_key: &MasterKey) -> Result<SyncPath, NameError> {
    let decoded = general_purpose::URL_SAFE
        .decode(encoded.as_bytes())
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(encoded.as_bytes()))
        .map_err(|e| NameError::Base64Decode {
            name: encoded.to_string(),
            reason: e.to_string(),
        })?;

    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);
        let associated_data: &[&[u8]] = &[];
        let decrypted = cipher
            .decrypt(associated_data, &decoded)
            .map_err(|_| NameError::DecodingFailed {
                name: encoded.to_string(),
            })?;
        let name = String::from_utf8(decrypted).map_err(|e| NameError::Utf8Decode {
            name: encoded.to_string(),
            reason: e.to_string(),
        })?;
        Ok(SyncPath::new(name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master_key() -> MasterKey {
        let mut enc = [0u8; 32];
        let mut mac = [0u8; 32];
        for i in 0..32 {
            enc[i] = i as u8;
            mac[i] = (32 + i) as u8;
        }
        MasterKey::new(enc, mac)
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let key = test_master_key();
        let path = SyncPath::new("docs/report.txt");
        let a = encode_name(&path, &key).unwrap();
        let b = encode_name(&path, &key).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_roundtrip() {
        let key = test_master_key();
        for raw in [
            "simple.txt",
            "nested/deep/tree/file.dat",
            "file with spaces.doc",
            "unicode-caf\u{00E9}.txt",
            ".hidden",
            "dir-entry",
        ] {
            let path = SyncPath::new(raw);
            let encoded = encode_name(&path, &key).unwrap();
            let decoded = decode_name(&encoded, &key).unwrap();
            assert_eq!(decoded, path, "roundtrip failed for '{raw}'");
        }
    }

    #[test]
    fn test_nfd_and_nfc_encode_identically() {
        let key = test_master_key();
        let nfd = SyncPath::new("cafe\u{0301}.txt");
        let nfc = SyncPath::new("caf\u{00E9}.txt");
        assert_eq!(
            encode_name(&nfd, &key).unwrap(),
            encode_name(&nfc, &key).unwrap()
        );
    }

    #[test]
    fn test_distinct_paths_encode_distinctly() {
        let key = test_master_key();
        let a = encode_name(&SyncPath::new("a.txt"), &key).unwrap();
        let b = encode_name(&SyncPath::new("b.txt"), &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_encoded_name_is_opaque_base64url() {
        let key = test_master_key();
        let encoded = encode_name(&SyncPath::new("a/b.txt"), &key).unwrap();
        assert!(!encoded.starts_with('.'));
        assert!(!encoded.contains('/'));
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '='));
    }

    #[test]
    fn test_decode_accepts_unpadded() {
        let key = test_master_key();
        let path = SyncPath::new("x.txt");
        let encoded = encode_name(&path, &key).unwrap();
        let unpadded = encoded.trim_end_matches('=');
        assert_eq!(decode_name(unpadded, &key).unwrap(), path);
    }

    #[test]
    fn test_decode_with_wrong_key_fails() {
        let key = test_master_key();
        let other = MasterKey::new([9u8; 32], [7u8; 32]);
        let encoded = encode_name(&SyncPath::new("x.txt"), &key).unwrap();
        assert!(matches!(
            decode_name(&encoded, &other),
            Err(NameError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let key = test_master_key();
        assert!(decode_name("!!not base64!!", &key).is_err());
    }
}
