use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KrownoError>;

#[derive(Error, Debug)]
pub enum KrownoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // archive layer
    #[error("invalid archive magic")]
    InvalidMagic,

    #[error("unsupported archive version {0}")]
    UnsupportedVersion(u32),

    #[error("archive format error: {0}")]
    ArchiveFormat(String),

    #[error("payload checksum mismatch")]
    ChecksumMismatch,

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    // storage layer
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("insufficient disk space: need {needed} bytes, {available} available")]
    DiskSpaceInsufficient { needed: u64, available: u64 },

    #[error("path too long: {0}")]
    PathTooLong(PathBuf),

    #[error("is a directory: {0}")]
    IsDirectory(PathBuf),

    #[error("not a directory: {0}")]
    NotDirectory(PathBuf),

    // crypto layer
    #[error("invalid password")]
    InvalidPassword,

    #[error("password rejected: {0}")]
    WeakPassword(&'static str),

    #[error("authentication failed (wrong password or corrupted data)")]
    AuthenticationFailed,

    // package layer
    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("unsupported distribution: {0}")]
    UnsupportedDistribution(String),

    #[error("package manager not found: {0}")]
    PackageManagerNotFound(String),

    // network layer
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl KrownoError {
    /// Map an open/stat failure to the storage-layer kind it names,
    /// keeping everything else as a transport error.
    pub fn from_io_path(e: std::io::Error, path: &std::path::Path) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(e),
        }
    }
}
