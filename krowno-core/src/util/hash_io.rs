use std::io::{Read, Result, Write};

use crate::hash::sha256::Sha256Stream;

/// Write adapter feeding every byte through a running hash before it
/// reaches the inner sink. The archive writer stacks this above the
/// codec so the digest covers the logical stream, not the on-disk one.
pub struct HashingWriter<'a, W: Write> {
    inner: W,
    hasher: &'a mut Sha256Stream,
    pub written: u64,
}

impl<'a, W: Write> HashingWriter<'a, W> {
    pub fn new(inner: W, hasher: &'a mut Sha256Stream) -> Self {
        Self {
            inner,
            hasher,
            written: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<'a, W: Write> Write for HashingWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

/// Read adapter bounded to a byte window. Hitting inner EOF while bytes
/// remain is an error, so a truncated payload never looks like a clean
/// end of stream.
pub struct LimitedReader<R: Read> {
    inner: R,
    remaining: u64,
}

impl<R: Read> LimitedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<R: Read> Read for LimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = buf.len().min(self.remaining as usize);
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "payload window truncated",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256;

    #[test]
    fn hashing_writer_digests_what_it_forwards() {
        let mut hasher = Sha256Stream::new();
        let mut sink = Vec::new();
        {
            let mut w = HashingWriter::new(&mut sink, &mut hasher);
            w.write_all(b"one").unwrap();
            w.write_all(b"two").unwrap();
            assert_eq!(w.written, 6);
        }
        assert_eq!(hasher.finalize(), sha256::digest(b"onetwo"));
        assert_eq!(sink, b"onetwo");
    }

    #[test]
    fn limited_reader_errors_on_short_window() {
        let data = b"abc";
        let mut r = LimitedReader::new(&data[..], 5);
        let mut out = Vec::new();
        let err = std::io::copy(&mut r, &mut out).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn limited_reader_stops_at_window() {
        let data = b"abcdef";
        let mut r = LimitedReader::new(&data[..], 4);
        let mut out = Vec::new();
        std::io::copy(&mut r, &mut out).unwrap();
        assert_eq!(out, b"abcd");
    }
}
