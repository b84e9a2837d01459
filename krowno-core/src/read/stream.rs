use std::io::{Read, Write};

use flate2::read::GzDecoder;

use crate::codec::{Compression, gzipc};
use crate::container::entry::{Entry, EntryKind, MAX_PATH_LEN, TAG_FILE, TAG_SYMLINK};
use crate::container::header::PAYLOAD_MARKER_V2;
use crate::error::{KrownoError, Result};
use crate::hash::sha256::Sha256Stream;
use crate::util::sanitize::sanitize_entry_path;

const COPY_CHUNK: usize = 1 << 20;

#[derive(Debug)]
enum Source<R: Read> {
    Plain(R),
    Gzip(Box<GzDecoder<R>>),
}

/// Pull-parser over a version-2 payload window. Every byte that comes
/// out of the codec feeds the running hash, so after the last entry the
/// digest covers the complete logical stream, marker included.
///
/// Per entry the parser walks tag → path-len → path → mode → mtime →
/// size-or-target-len → payload; a short read in any of those states is
/// a format failure, never a clean EOF.
#[derive(Debug)]
pub struct EntryReader<R: Read> {
    src: Source<R>,
    hasher: Sha256Stream,
}

impl<R: Read> EntryReader<R> {
    pub fn new(inner: R, compression: Compression) -> Result<Self> {
        let src = match compression {
            Compression::None => Source::Plain(inner),
            Compression::Gzip => Source::Gzip(Box::new(gzipc::decoder(inner))),
            other => {
                return Err(KrownoError::DecompressionFailed(format!(
                    "codec not supported: {other:?}"
                )));
            }
        };
        let mut reader = Self {
            src,
            hasher: Sha256Stream::new(),
        };
        let mut marker = [0u8; 6];
        reader.read_exact(&mut marker)?;
        if &marker != PAYLOAD_MARKER_V2 {
            return Err(KrownoError::ArchiveFormat(
                "missing version-2 payload marker".into(),
            ));
        }
        Ok(reader)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let gzip = matches!(self.src, Source::Gzip(_));
        let res = match &mut self.src {
            Source::Plain(r) => r.read(buf),
            Source::Gzip(d) => d.read(buf),
        };
        match res {
            Ok(n) => {
                self.hasher.update(&buf[..n]);
                Ok(n)
            }
            Err(e) => Err(classify_read_error(e, gzip)),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.fill(&mut buf[filled..])?;
            if n == 0 {
                return Err(KrownoError::ArchiveFormat(
                    "unexpected end of payload".into(),
                ));
            }
            filled += n;
        }
        Ok(())
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(i64::from_le_bytes(b))
    }

    fn read_len_prefixed(&mut self, what: &str) -> Result<Vec<u8>> {
        let len = self.read_u32()?;
        if len == 0 || len > MAX_PATH_LEN {
            return Err(KrownoError::ArchiveFormat(format!(
                "implausible {what} length {len}"
            )));
        }
        let mut bytes = vec![0u8; len as usize];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Next entry header, or `None` at a clean end of payload. For tag-1
    /// entries the content bytes are still pending; the caller must
    /// consume exactly `size` bytes via `copy_content` or `skip_content`
    /// before asking for the next entry.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        let mut tag = [0u8; 1];
        if self.fill(&mut tag)? == 0 {
            return Ok(None);
        }

        let path_bytes = self.read_len_prefixed("path")?;
        let raw_path = String::from_utf8(path_bytes)
            .map_err(|_| KrownoError::ArchiveFormat("entry path is not UTF-8".into()))?;
        let path = sanitize_entry_path(&raw_path)?;
        let mode = self.read_u64()?;
        let mtime = self.read_i64()?;

        let kind = match tag[0] {
            TAG_FILE => EntryKind::File {
                size: self.read_u64()?,
            },
            TAG_SYMLINK => EntryKind::Symlink {
                target: self.read_len_prefixed("symlink target")?,
            },
            other => {
                return Err(KrownoError::ArchiveFormat(format!(
                    "unknown entry tag {other}"
                )));
            }
        };

        Ok(Some(Entry {
            path,
            mode,
            mtime,
            kind,
        }))
    }

    /// Stream exactly `size` content bytes into `out`.
    pub fn copy_content(&mut self, size: u64, out: &mut dyn Write) -> Result<()> {
        let mut buf = vec![0u8; COPY_CHUNK.min(size.max(1) as usize)];
        let mut left = size;
        while left > 0 {
            let want = buf.len().min(left as usize);
            let n = self.fill(&mut buf[..want])?;
            if n == 0 {
                return Err(KrownoError::ArchiveFormat(
                    "entry content truncated".into(),
                ));
            }
            out.write_all(&buf[..n])?;
            left -= n as u64;
        }
        Ok(())
    }

    /// Consume `size` content bytes without materialising them. The
    /// bytes still feed the hash so the stream stays aligned.
    pub fn skip_content(&mut self, size: u64) -> Result<()> {
        self.copy_content(size, &mut std::io::sink())
    }

    pub fn finalize(self) -> [u8; 32] {
        self.hasher.finalize()
    }
}

fn classify_read_error(e: std::io::Error, gzip: bool) -> KrownoError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            KrownoError::ArchiveFormat("payload truncated".into())
        }
        std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData if gzip => {
            KrownoError::DecompressionFailed(e.to_string())
        }
        _ => KrownoError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::entry::{write_file_header, write_symlink};
    use crate::hash::sha256;

    fn v2_payload(build: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut buf = Vec::from(&PAYLOAD_MARKER_V2[..]);
        build(&mut buf);
        buf
    }

    #[test]
    fn parses_file_and_symlink_entries() {
        let payload = v2_payload(|buf| {
            write_file_header(&mut *buf, b"/t/a", 0o100644, 5, 3).unwrap();
            buf.extend_from_slice(b"abc");
            write_symlink(&mut *buf, b"/t/lnk", 5, b"../target").unwrap();
        });

        let mut r = EntryReader::new(&payload[..], Compression::None).unwrap();
        let e = r.next_entry().unwrap().unwrap();
        assert_eq!(e.path, "t/a");
        assert_eq!(e.kind, EntryKind::File { size: 3 });
        let mut out = Vec::new();
        r.copy_content(3, &mut out).unwrap();
        assert_eq!(out, b"abc");

        let e = r.next_entry().unwrap().unwrap();
        assert_eq!(e.path, "t/lnk");
        assert!(e.is_symlink());
        assert!(r.next_entry().unwrap().is_none());

        assert_eq!(r.finalize(), sha256::digest(&payload));
    }

    #[test]
    fn traversal_path_rejects_archive() {
        let payload = v2_payload(|buf| {
            write_file_header(&mut *buf, b"../x", 0, 0, 0).unwrap();
        });
        let mut r = EntryReader::new(&payload[..], Compression::None).unwrap();
        assert!(matches!(
            r.next_entry(),
            Err(KrownoError::ArchiveFormat(_))
        ));
    }

    #[test]
    fn bad_tag_rejected() {
        let mut payload = Vec::from(&PAYLOAD_MARKER_V2[..]);
        payload.push(9);
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.push(b'x');
        payload.extend_from_slice(&[0u8; 16]);
        let mut r = EntryReader::new(&payload[..], Compression::None).unwrap();
        assert!(matches!(
            r.next_entry(),
            Err(KrownoError::ArchiveFormat(_))
        ));
    }

    #[test]
    fn truncated_header_is_a_format_error() {
        let payload = v2_payload(|buf| {
            buf.push(TAG_FILE);
            buf.extend_from_slice(&4u32.to_le_bytes());
            buf.extend_from_slice(b"t/");
        });
        let mut r = EntryReader::new(&payload[..], Compression::None).unwrap();
        assert!(matches!(
            r.next_entry(),
            Err(KrownoError::ArchiveFormat(_))
        ));
    }

    #[test]
    fn wrong_marker_rejected() {
        let err = EntryReader::new(&b"NOTKHR etc"[..], Compression::None).unwrap_err();
        assert!(matches!(err, KrownoError::ArchiveFormat(_)));
    }

    #[test]
    fn gzip_source_decodes_transparently() {
        let payload = v2_payload(|buf| {
            write_file_header(&mut *buf, b"f", 0, 0, 2).unwrap();
            buf.extend_from_slice(b"hi");
        });
        let packed = gzipc::compress_all(&payload).unwrap();
        let mut r = EntryReader::new(&packed[..], Compression::Gzip).unwrap();
        let e = r.next_entry().unwrap().unwrap();
        assert_eq!(e.path, "f");
        r.skip_content(2).unwrap();
        assert!(r.next_entry().unwrap().is_none());
        // digest covers the logical (uncompressed) stream
        assert_eq!(r.finalize(), sha256::digest(&payload));
    }

    #[test]
    fn plaintext_behind_gzip_tag_fails_decompression() {
        let payload = v2_payload(|_| {});
        let err = EntryReader::new(&payload[..], Compression::Gzip).unwrap_err();
        assert!(matches!(err, KrownoError::DecompressionFailed(_)));
    }
}
