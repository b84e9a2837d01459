use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;

pub const DIGEST_LEN: usize = 32;

const FILE_READ_CHUNK: usize = 1 << 20;

/// Streaming SHA-256 front-end used for payload checksums and dedup keys.
#[derive(Clone, Debug, Default)]
pub struct Sha256Stream {
    inner: Sha256,
}

impl Sha256Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finalize(self) -> [u8; DIGEST_LEN] {
        self.inner.finalize().into()
    }
}

/// One-shot digest of a byte slice.
pub fn digest(bytes: &[u8]) -> [u8; DIGEST_LEN] {
    let mut h = Sha256Stream::new();
    h.update(bytes);
    h.finalize()
}

/// Digest a file's content in 1 MiB reads.
pub fn digest_file(path: &Path) -> Result<[u8; DIGEST_LEN]> {
    let mut f =
        File::open(path).map_err(|e| crate::error::KrownoError::from_io_path(e, path))?;
    if f.metadata()?.is_dir() {
        return Err(crate::error::KrownoError::IsDirectory(path.to_path_buf()));
    }
    let mut h = Sha256Stream::new();
    let mut buf = vec![0u8; FILE_READ_CHUNK];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    Ok(h.finalize())
}
