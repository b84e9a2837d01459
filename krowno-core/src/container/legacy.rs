use std::io::Write;

use crate::error::{KrownoError, Result};
use crate::util::sanitize::sanitize_entry_path;

/// Marker opening the version-1 textual payload. Encrypted archives
/// carry this stream as their pre-encryption intermediate; version-1
/// archives carry it in the clear.
pub const MARKER_V1: &[u8] = b"KROWNO_BACKUP_V1\n";

/// Record header for one file in the textual stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyEntry {
    pub path: String,
    pub size: u64,
    pub mtime: i64,
}

/// Serialiser for the textual stream. Only regular files exist at this
/// level; there is no record form for symbolic links.
pub struct LegacyWriter<W: Write> {
    inner: W,
}

impl<W: Write> LegacyWriter<W> {
    pub fn new(mut inner: W) -> std::io::Result<Self> {
        inner.write_all(MARKER_V1)?;
        Ok(Self { inner })
    }

    pub fn add_file(&mut self, path: &str, mtime: i64, content: &[u8]) -> std::io::Result<()> {
        writeln!(self.inner, "FILE: {path}")?;
        writeln!(self.inner, "LEN: {}", content.len())?;
        writeln!(self.inner, "MTIME: {mtime}")?;
        self.inner.write_all(content)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Pull-parser over an in-memory textual payload. Yields the record
/// header plus a borrowed content slice; paths come out sanitised.
pub struct LegacyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LegacyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if !buf.starts_with(MARKER_V1) {
            return Err(KrownoError::ArchiveFormat(
                "missing legacy payload marker".into(),
            ));
        }
        Ok(Self {
            buf,
            pos: MARKER_V1.len(),
        })
    }

    fn read_line(&mut self) -> Result<&'a str> {
        let rest = &self.buf[self.pos..];
        let nl = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| KrownoError::ArchiveFormat("unterminated record line".into()))?;
        let line = std::str::from_utf8(&rest[..nl])
            .map_err(|_| KrownoError::ArchiveFormat("record line is not UTF-8".into()))?;
        self.pos += nl + 1;
        Ok(line)
    }

    fn field<T: std::str::FromStr>(&mut self, key: &str) -> Result<T> {
        let line = self.read_line()?;
        let value = line
            .strip_prefix(key)
            .ok_or_else(|| KrownoError::ArchiveFormat(format!("expected {key:?} line")))?;
        value
            .parse()
            .map_err(|_| KrownoError::ArchiveFormat(format!("bad {key:?} value {value:?}")))
    }

    pub fn next(&mut self) -> Result<Option<(LegacyEntry, &'a [u8])>> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        let line = self.read_line()?;
        let raw_path = line
            .strip_prefix("FILE: ")
            .ok_or_else(|| KrownoError::ArchiveFormat("expected \"FILE: \" line".into()))?;
        let path = sanitize_entry_path(raw_path)?;
        let size: u64 = self.field("LEN: ")?;
        let mtime: i64 = self.field("MTIME: ")?;

        let end = self
            .pos
            .checked_add(size as usize)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(|| KrownoError::ArchiveFormat("record content truncated".into()))?;
        let content = &self.buf[self.pos..end];
        self.pos = end;
        Ok(Some((LegacyEntry { path, size, mtime }, content)))
    }
}
