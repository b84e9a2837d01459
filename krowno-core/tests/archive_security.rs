// Hostile-input coverage: traversal payloads, tampering, truncation,
// and codec/header disagreement must all fail loudly.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use krowno_core::KrownoError;
use krowno_core::codec::Compression;
use krowno_core::container::entry::write_file_header;
use krowno_core::container::header::{EncryptionDesc, Header, PAYLOAD_MARKER_V2};
use krowno_core::hash::sha256;
use krowno_core::pack::writer::{WriteOptions, write_archive};
use krowno_core::read::extract::{ExtractOptions, extract};
use krowno_core::read::index::index;

fn write_source(dir: &Path, rel: &str, content: &[u8]) -> PathBuf {
    let p = dir.join(rel);
    fs::create_dir_all(p.parent().unwrap()).unwrap();
    fs::write(&p, content).unwrap();
    p
}

/// Hand-assemble a version-2 archive around the given payload bytes.
fn craft_archive(
    path: &Path,
    compression: Compression,
    payload: &[u8],
    checksum: [u8; 32],
) {
    let mut header = Header::new(compression, EncryptionDesc::default());
    header.tar_size = payload.len() as u64;
    header.checksum = checksum;
    let mut bytes = Vec::new();
    header.write_to(&mut bytes).unwrap();
    bytes.extend_from_slice(payload);
    fs::write(path, bytes).unwrap();
}

#[test]
fn traversal_entry_rejects_archive_and_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut payload = Vec::from(&PAYLOAD_MARKER_V2[..]);
    write_file_header(&mut payload, b"../x", 0o644, 0, 4).unwrap();
    payload.extend_from_slice(b"evil");

    let archive = dir.path().join("hostile.khr");
    craft_archive(&archive, Compression::None, &payload, sha256::digest(&payload));

    let out = dir.path().join("out");
    let err = extract(&archive, &out, None).unwrap_err();
    assert!(matches!(err, KrownoError::ArchiveFormat(_)), "{err}");
    assert!(!out.exists() || fs::read_dir(&out).unwrap().next().is_none());
}

#[test]
fn flipped_payload_byte_is_a_checksum_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_source(dir.path(), "t/a", b"some stable content");
    let archive = dir.path().join("snap.khr");
    write_archive(&[a], &archive, &WriteOptions::default(), None).unwrap();

    // flip the last byte: file content, after the entry header
    let mut bytes = fs::read(&archive).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&archive, &bytes).unwrap();

    let err = extract(&archive, &dir.path().join("out"), None).unwrap_err();
    assert!(matches!(err, KrownoError::ChecksumMismatch), "{err}");
}

#[test]
fn truncated_payload_never_passes() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_source(dir.path(), "t/a", b"truncate me please");
    let archive = dir.path().join("snap.khr");
    write_archive(&[a], &archive, &WriteOptions::default(), None).unwrap();

    let mut bytes = fs::read(&archive).unwrap();
    bytes.pop();
    fs::write(&archive, &bytes).unwrap();

    let err = extract(&archive, &dir.path().join("out"), None).unwrap_err();
    assert!(
        matches!(
            err,
            KrownoError::ArchiveFormat(_) | KrownoError::ChecksumMismatch
        ),
        "{err}"
    );
}

#[test]
fn gzip_header_over_plaintext_payload_fails_decompression() {
    let dir = tempfile::tempdir().unwrap();
    let mut payload = Vec::from(&PAYLOAD_MARKER_V2[..]);
    write_file_header(&mut payload, b"t/a", 0o644, 0, 2).unwrap();
    payload.extend_from_slice(b"ok");

    let archive = dir.path().join("mislabelled.khr");
    craft_archive(&archive, Compression::Gzip, &payload, sha256::digest(&payload));

    let err = extract(&archive, &dir.path().join("out"), None).unwrap_err();
    assert!(matches!(err, KrownoError::DecompressionFailed(_)), "{err}");
}

#[test]
fn garbage_magic_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("not-an-archive");
    fs::write(&archive, b"GIF89a definitely not krowno").unwrap();
    let err = extract(&archive, &dir.path().join("out"), None).unwrap_err();
    assert!(matches!(err, KrownoError::InvalidMagic), "{err}");
}

#[test]
fn selective_extract_writes_only_requested_paths() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_source(dir.path(), "t/a", b"alpha");
    let b = write_source(dir.path(), "t/b", b"beta");
    let archive = dir.path().join("snap.khr");
    write_archive(&[a.clone(), b.clone()], &archive, &WriteOptions::default(), None).unwrap();

    let wanted: HashSet<String> =
        [b.to_str().unwrap().trim_start_matches('/').to_string()].into();
    let out = dir.path().join("out");
    extract(
        &archive,
        &out,
        Some(&ExtractOptions {
            password: None,
            select: Some(wanted),
        }),
    )
    .unwrap();

    let a_out = out.join(a.to_str().unwrap().trim_start_matches('/'));
    let b_out = out.join(b.to_str().unwrap().trim_start_matches('/'));
    assert!(!a_out.exists());
    assert_eq!(fs::read(&b_out).unwrap(), b"beta");
}

#[test]
fn selective_extract_skips_checksum_verification() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_source(dir.path(), "t/a", b"aaaa");
    let b = write_source(dir.path(), "t/b", b"bbbb");
    let archive = dir.path().join("snap.khr");
    write_archive(&[a.clone(), b], &archive, &WriteOptions::default(), None).unwrap();

    // corrupt the very last content byte (belongs to t/b)
    let mut bytes = fs::read(&archive).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&archive, &bytes).unwrap();

    // selecting only t/a still succeeds: no checksum pass in selective mode
    let wanted: HashSet<String> =
        [a.to_str().unwrap().trim_start_matches('/').to_string()].into();
    let out = dir.path().join("out");
    extract(
        &archive,
        &out,
        Some(&ExtractOptions {
            password: None,
            select: Some(wanted),
        }),
    )
    .unwrap();
    assert_eq!(
        fs::read(out.join(a.to_str().unwrap().trim_start_matches('/'))).unwrap(),
        b"aaaa"
    );
}

#[test]
fn index_still_verifies_the_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_source(dir.path(), "t/a", b"indexed content");
    let archive = dir.path().join("snap.khr");
    write_archive(&[a], &archive, &WriteOptions::default(), None).unwrap();

    let mut bytes = fs::read(&archive).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&archive, &bytes).unwrap();

    let err = index(&archive, None).unwrap_err();
    assert!(matches!(err, KrownoError::ChecksumMismatch), "{err}");
}
