use std::io::{Read, Write};

use crate::codec::Compression;
use crate::crypto::envelope::{NONCE_LEN, SALT_LEN};
use crate::error::{KrownoError, Result};

pub const MAGIC: &[u8; 8] = b"KHRONO01";

/// Legacy textual payload.
pub const VERSION_LEGACY: u32 = 1;
/// Tagged binary payload.
pub const VERSION: u32 = 2;

/// magic(8) + version(4) + compression(1) + algo(1) + kdf(1) + salt(32)
/// + nonce(12) + ops(4) + mem(4) + tar_size(8) + checksum(32)
pub const HEADER_LEN: u64 = 107;

/// First bytes of a version-2 payload.
pub const PAYLOAD_MARKER_V2: &[u8; 6] = b"KHRV2\n";

pub const ALGO_CHACHA20_POLY1305: u8 = 1;
pub const KDF_ARGON2ID: u8 = 1;

/// Encryption descriptor embedded in the header. All-zero means the
/// payload is stored in the clear; non-zero ops/mem means the payload is
/// a serialised ciphertext and the checksum covers the ciphertext bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncryptionDesc {
    pub algo: u8,
    pub kdf: u8,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ops: u32,
    pub mem_kib: u32,
}

impl EncryptionDesc {
    pub fn is_encrypted(&self) -> bool {
        self.ops != 0 || self.mem_kib != 0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Header {
    pub version: u32,
    pub compression: Compression,
    pub encryption: EncryptionDesc,
    /// Exact byte count of the payload segment as stored on disk.
    pub tar_size: u64,
    /// SHA-256 of the logical stream (plaintext archives) or of the
    /// on-disk ciphertext bytes (encrypted archives).
    pub checksum: [u8; 32],
}

impl Header {
    pub fn new(compression: Compression, encryption: EncryptionDesc) -> Self {
        Self {
            version: VERSION,
            compression,
            encryption,
            tar_size: 0,
            checksum: [0u8; 32],
        }
    }

    pub fn write_to(&self, mut w: impl Write) -> std::io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&self.version.to_le_bytes())?;
        w.write_all(&[self.compression.tag()])?;
        w.write_all(&[self.encryption.algo])?;
        w.write_all(&[self.encryption.kdf])?;
        w.write_all(&self.encryption.salt)?;
        w.write_all(&self.encryption.nonce)?;
        w.write_all(&self.encryption.ops.to_le_bytes())?;
        w.write_all(&self.encryption.mem_kib.to_le_bytes())?;
        w.write_all(&self.tar_size.to_le_bytes())?;
        w.write_all(&self.checksum)?;
        Ok(())
    }

    pub fn read_from(mut r: impl Read) -> Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)
            .map_err(|_| KrownoError::InvalidMagic)?;
        if &magic != MAGIC {
            return Err(KrownoError::InvalidMagic);
        }

        let version = read_u32(&mut r)?;
        if version != VERSION_LEGACY && version != VERSION {
            return Err(KrownoError::UnsupportedVersion(version));
        }

        let compression = Compression::from_tag(read_u8(&mut r)?)?;

        let mut enc = EncryptionDesc {
            algo: read_u8(&mut r)?,
            kdf: read_u8(&mut r)?,
            ..Default::default()
        };
        r.read_exact(&mut enc.salt).map_err(short_header)?;
        r.read_exact(&mut enc.nonce).map_err(short_header)?;
        enc.ops = read_u32(&mut r)?;
        enc.mem_kib = read_u32(&mut r)?;

        let tar_size = read_u64(&mut r)?;
        let mut checksum = [0u8; 32];
        r.read_exact(&mut checksum).map_err(short_header)?;

        Ok(Self {
            version,
            compression,
            encryption: enc,
            tar_size,
            checksum,
        })
    }
}

fn short_header(_: std::io::Error) -> KrownoError {
    KrownoError::ArchiveFormat("short read in archive header".into())
}

fn read_u8(mut r: impl Read) -> Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b).map_err(short_header)?;
    Ok(b[0])
}

fn read_u32(mut r: impl Read) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).map_err(short_header)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64(mut r: impl Read) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(short_header)?;
    Ok(u64::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_fixed_width() {
        let h = Header::new(Compression::Gzip, EncryptionDesc::default());
        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
    }

    #[test]
    fn round_trip_preserves_all_fields() {
        let mut enc = EncryptionDesc {
            algo: ALGO_CHACHA20_POLY1305,
            kdf: KDF_ARGON2ID,
            ops: 3,
            mem_kib: 65536,
            ..Default::default()
        };
        enc.salt = [0xAB; 32];
        enc.nonce = [0xCD; 12];
        let mut h = Header::new(Compression::Gzip, enc);
        h.tar_size = 0xDEAD_BEEF;
        h.checksum = [0x42; 32];

        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();
        let back = Header::read_from(&buf[..]).unwrap();
        assert_eq!(back.version, VERSION);
        assert_eq!(back.compression, Compression::Gzip);
        assert_eq!(back.encryption, enc);
        assert_eq!(back.tar_size, h.tar_size);
        assert_eq!(back.checksum, h.checksum);
        assert!(back.encryption.is_encrypted());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut buf = Vec::new();
        Header::new(Compression::None, EncryptionDesc::default())
            .write_to(&mut buf)
            .unwrap();
        buf[0] = b'X';
        assert!(matches!(
            Header::read_from(&buf[..]),
            Err(KrownoError::InvalidMagic)
        ));
    }

    #[test]
    fn unknown_version_rejected() {
        let mut buf = Vec::new();
        let mut h = Header::new(Compression::None, EncryptionDesc::default());
        h.version = 9;
        h.write_to(&mut buf).unwrap();
        assert!(matches!(
            Header::read_from(&buf[..]),
            Err(KrownoError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn zero_descriptor_means_plaintext() {
        assert!(!EncryptionDesc::default().is_encrypted());
    }
}
