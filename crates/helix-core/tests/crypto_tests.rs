//! Round-trip laws for the blob codec and the name encoder.

use std::fs;

use helix_core::crypto::keys::MasterKey;
use helix_core::fs::entry::EntryKind;
use helix_core::fs::file::{decrypt_file, decrypt_header, encrypt_file, EncryptOptions};
use helix_core::fs::name::{decode_name, encode_name};
use helix_core::fs::Timestamp;
use helix_core::SyncPath;

fn master_key() -> MasterKey {
    MasterKey::new([0x11; 32], [0x22; 32])
}

#[test]
fn test_encrypt_then_decrypt_restores_bytes_and_mtime() {
    let dir = tempfile::tempdir().unwrap();
    let key = master_key();
    let source = dir.path().join("source.bin");
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&source, &payload).unwrap();

    let blob = dir.path().join("blob");
    encrypt_file(
        Some(&source),
        &blob,
        &key,
        &EncryptOptions {
            name: SyncPath::new("data/source.bin"),
            kind: EntryKind::File,
            modified: Timestamp::from_millis(1_650_000_000_000),
        },
    )
    .unwrap();

    let restored = dir.path().join("restored.bin");
    let header = decrypt_file(&blob, &restored, &key).unwrap();

    assert_eq!(fs::read(&restored).unwrap(), payload);
    assert_eq!(header.name, SyncPath::new("data/source.bin"));
    assert_eq!(header.len, payload.len() as u64);
    let mtime = Timestamp::from(fs::metadata(&restored).unwrap().modified().unwrap());
    assert_eq!(mtime, Timestamp::from_millis(1_650_000_000_000));
}

#[test]
fn test_header_decrypt_agrees_with_full_decrypt() {
    let dir = tempfile::tempdir().unwrap();
    let key = master_key();
    let source = dir.path().join("f");
    fs::write(&source, b"header agreement").unwrap();

    let blob = dir.path().join("blob");
    let written = encrypt_file(
        Some(&source),
        &blob,
        &key,
        &EncryptOptions {
            name: SyncPath::new("f"),
            kind: EntryKind::File,
            modified: Timestamp::from_millis(77_000),
        },
    )
    .unwrap();

    let peeked = decrypt_header(&blob, &key).unwrap();
    assert_eq!(peeked, written);

    let out = dir.path().join("out");
    let full = decrypt_file(&blob, &out, &key).unwrap();
    assert_eq!(full, peeked);
}

#[test]
fn test_ciphertexts_differ_for_same_plaintext() {
    // Content encryption is randomized per blob; only names are
    // deterministic.
    let dir = tempfile::tempdir().unwrap();
    let key = master_key();
    let source = dir.path().join("f");
    fs::write(&source, b"same plaintext").unwrap();

    let options = EncryptOptions {
        name: SyncPath::new("f"),
        kind: EntryKind::File,
        modified: Timestamp::from_millis(1),
    };
    let blob_a = dir.path().join("a");
    let blob_b = dir.path().join("b");
    encrypt_file(Some(&source), &blob_a, &key, &options).unwrap();
    encrypt_file(Some(&source), &blob_b, &key, &options).unwrap();

    assert_ne!(fs::read(&blob_a).unwrap(), fs::read(&blob_b).unwrap());
}

#[test]
fn test_name_encoding_is_injective_over_a_tree() {
    let key = master_key();
    let paths = [
        "a",
        "A",
        "a/b",
        "a/b.txt",
        "a/b/c.txt",
        "ab",
        "b/a",
        "deep/ly/nested/path/file.ext",
        "file.ext",
        "caf\u{00E9}.txt",
        ".hidden",
        "with space.txt",
    ];

    let mut encoded: Vec<String> = Vec::new();
    for raw in paths {
        let name = encode_name(&SyncPath::new(raw), &key).unwrap();
        assert!(
            !encoded.contains(&name),
            "encoding collision for '{raw}'"
        );
        // Every encoded name decodes back to its path.
        assert_eq!(decode_name(&name, &key).unwrap(), SyncPath::new(raw));
        encoded.push(name);
    }
}

#[test]
fn test_names_are_key_bound() {
    let key_a = master_key();
    let key_b = MasterKey::new([0x33; 32], [0x44; 32]);
    let path = SyncPath::new("secret/location.txt");

    let under_a = encode_name(&path, &key_a).unwrap();
    let under_b = encode_name(&path, &key_b).unwrap();
    assert_ne!(under_a, under_b);
    assert!(decode_name(&under_a, &key_b).is_err());
}

#[test]
fn test_derived_keys_drive_the_codec() {
    // End-to-end: derive from passphrase, encrypt, re-derive, decrypt.
    let dir = tempfile::tempdir().unwrap();
    let params = helix_core::crypto::keys::KdfParams {
        log_n: 4,
        r: 8,
        p: 1,
    };
    let key1 = MasterKey::derive("pass phrase", b"fixed salt", &params).unwrap();
    let key2 = MasterKey::derive("pass phrase", b"fixed salt", &params).unwrap();

    let source = dir.path().join("s");
    fs::write(&source, b"derived-key payload").unwrap();
    let blob = dir.path().join("blob");
    encrypt_file(
        Some(&source),
        &blob,
        &key1,
        &EncryptOptions {
            name: SyncPath::new("s"),
            kind: EntryKind::File,
            modified: Timestamp::from_millis(5),
        },
    )
    .unwrap();

    let out = dir.path().join("o");
    decrypt_file(&blob, &out, &key2).unwrap();
    assert_eq!(fs::read(out).unwrap(), b"derived-key payload");
}
