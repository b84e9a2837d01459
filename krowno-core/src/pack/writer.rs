use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::codec::{Compression, gzipc};
use crate::container::entry::{self, MAX_PATH_LEN};
use crate::container::header::{
    ALGO_CHACHA20_POLY1305, EncryptionDesc, HEADER_LEN, Header, KDF_ARGON2ID, PAYLOAD_MARKER_V2,
};
use crate::container::legacy::LegacyWriter;
use crate::crypto::{envelope, kdf};
use crate::error::{KrownoError, Result};
use crate::hash::sha256::{self, Sha256Stream};
use crate::progress::{ProgressFn, report as report_progress};
use crate::util::hash_io::HashingWriter;

const READ_CHUNK: usize = 1 << 20;
const PROGRESS_EVERY: usize = 100;

/// Free-space margin required on top of the raw source total.
const MIN_FREE_MARGIN: u64 = 16 * 1024 * 1024;

/// Above either bound the whole-payload buffering that encryption needs
/// is not acceptable; the writer drops the password and records it.
const MAX_ENCRYPTED_FILES: usize = 5000;
const MAX_ENCRYPTED_BYTES: u64 = 1 << 30;

#[derive(Clone, Copy, Default)]
pub struct WriteOptions<'a> {
    pub compression: Compression,
    pub password: Option<&'a str>,
}

/// Outcome summary handed back to the caller so heuristic decisions are
/// visible, not silent.
#[derive(Clone, Debug, Default)]
pub struct WriteReport {
    pub entries_written: u64,
    pub entries_skipped: u64,
    /// Byte count of the logical stream (before codec/crypto).
    pub logical_bytes: u64,
    /// Byte count of the payload as stored on disk.
    pub payload_bytes: u64,
    pub encryption_disabled: bool,
    pub compression_fallback: bool,
}

/// Write an archive from `sources`, in the order supplied. Paths are
/// stored exactly as given; the reader sanitises on the way out.
///
/// Unencrypted archives stream straight to disk. Encrypted archives
/// buffer the textual intermediate because the envelope seals a whole
/// blob at a time.
pub fn write_archive(
    sources: &[PathBuf],
    out: &Path,
    opts: &WriteOptions,
    progress: Option<&ProgressFn>,
) -> Result<WriteReport> {
    let mut report = WriteReport::default();

    let total_bytes: u64 = sources
        .iter()
        .filter_map(|p| fs::symlink_metadata(p).ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum();

    preflight_space(out, total_bytes)?;

    let mut password = opts.password;
    if password.is_some()
        && (sources.len() > MAX_ENCRYPTED_FILES || total_bytes > MAX_ENCRYPTED_BYTES)
    {
        warn!(
            files = sources.len(),
            total_bytes, "snapshot too large to buffer for encryption, writing unencrypted"
        );
        password = None;
        report.encryption_disabled = true;
    }

    let (compression, fell_back) = opts.compression.normalize();
    if fell_back {
        warn!(
            requested = ?opts.compression,
            "compression codec not implemented, falling back to gzip"
        );
        report.compression_fallback = true;
    }

    match password {
        Some(pw) => write_encrypted(sources, out, compression, pw, progress, &mut report)?,
        None => write_streaming(sources, out, compression, progress, &mut report)?,
    }
    Ok(report)
}

fn preflight_space(out: &Path, total_bytes: u64) -> Result<()> {
    let dest_dir = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let needed = total_bytes + MIN_FREE_MARGIN.max(total_bytes / 10);
    let available = fs4::available_space(dest_dir)?;
    if available < needed {
        return Err(KrownoError::DiskSpaceInsufficient { needed, available });
    }
    Ok(())
}

fn write_streaming(
    sources: &[PathBuf],
    out: &Path,
    compression: Compression,
    progress: Option<&ProgressFn>,
    report: &mut WriteReport,
) -> Result<()> {
    let mut f = File::create(out)?;
    let mut header = Header::new(compression, EncryptionDesc::default());
    header.write_to(&mut f)?;

    let mut hasher = Sha256Stream::new();
    match compression {
        Compression::Gzip => {
            let enc = gzipc::encoder(&mut f);
            let mut w = HashingWriter::new(enc, &mut hasher);
            append_entries(&mut w, sources, progress, report)?;
            report.logical_bytes = w.written;
            w.into_inner()
                .finish()
                .map_err(|e| KrownoError::CompressionFailed(e.to_string()))?;
        }
        _ => {
            let mut w = HashingWriter::new(&mut f, &mut hasher);
            append_entries(&mut w, sources, progress, report)?;
            report.logical_bytes = w.written;
        }
    }
    // the payload starts right after the fixed header, so the cursor
    // position gives its on-disk length without any extra bookkeeping
    let payload_bytes = f.stream_position()? - HEADER_LEN;

    header.tar_size = payload_bytes;
    header.checksum = hasher.finalize();
    report.payload_bytes = payload_bytes;

    // a failure from here on leaves the archive invalid, which is the
    // correct outcome for a half-finalised header
    f.seek(SeekFrom::Start(0))?;
    header.write_to(&mut f)?;
    f.flush()?;
    Ok(())
}

fn append_entries<W: Write>(
    w: &mut W,
    sources: &[PathBuf],
    progress: Option<&ProgressFn>,
    report: &mut WriteReport,
) -> Result<()> {
    w.write_all(PAYLOAD_MARKER_V2)?;
    let total = sources.len();
    let mut buf = vec![0u8; READ_CHUNK];
    for (i, src) in sources.iter().enumerate() {
        if i % PROGRESS_EVERY == 0 {
            report_progress(progress, "archive", i, total);
        }
        if append_path(w, src, &mut buf)? {
            report.entries_written += 1;
        } else {
            report.entries_skipped += 1;
        }
    }
    report_progress(progress, "archive", total, total);
    Ok(())
}

/// Append one source. Source-side failures skip the entry and return
/// `Ok(false)`; sink-side failures are fatal because the archive itself
/// is now suspect.
fn append_path<W: Write>(w: &mut W, src: &Path, buf: &mut [u8]) -> Result<bool> {
    let md = match fs::symlink_metadata(src) {
        Ok(md) => md,
        Err(e) => {
            warn!(path = %src.display(), error = %e, "skipping unreadable source");
            return Ok(false);
        }
    };
    let path_bytes = src.as_os_str().as_bytes();
    if path_bytes.is_empty() || path_bytes.len() > MAX_PATH_LEN as usize {
        warn!(path = %src.display(), "skipping source with unusable path length");
        return Ok(false);
    }
    let mtime = mtime_from(&md);

    if md.file_type().is_symlink() {
        let target = match fs::read_link(src) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %src.display(), error = %e, "skipping unreadable symlink");
                return Ok(false);
            }
        };
        entry::write_symlink(&mut *w, path_bytes, mtime, target.as_os_str().as_bytes())?;
        return Ok(true);
    }

    let mut file = match File::open(src) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %src.display(), error = %e, "skipping unopenable source");
            return Ok(false);
        }
    };
    let fmd = match file.metadata() {
        Ok(m) => m,
        Err(e) => {
            warn!(path = %src.display(), error = %e, "skipping unstatable source");
            return Ok(false);
        }
    };
    if !fmd.is_file() {
        // fifo, socket, device node, directory
        return Ok(false);
    }

    let size = fmd.len();
    entry::write_file_header(&mut *w, path_bytes, u64::from(mode_from(&fmd)), mtime, size)?;

    let mut left = size;
    while left > 0 {
        let want = buf.len().min(left as usize);
        let n = match file.read(&mut buf[..want]) {
            Ok(n) => n,
            Err(e) => {
                warn!(path = %src.display(), error = %e, "read failed mid-entry");
                0
            }
        };
        if n == 0 {
            // the file shrank (or failed) under us; keep the declared
            // size honest by zero-filling so the stream stays aligned
            warn!(path = %src.display(), missing = left, "zero-filling short source");
            buf.fill(0);
            while left > 0 {
                let k = buf.len().min(left as usize);
                w.write_all(&buf[..k])?;
                left -= k as u64;
            }
            break;
        }
        w.write_all(&buf[..n])?;
        left -= n as u64;
    }
    Ok(true)
}

fn write_encrypted(
    sources: &[PathBuf],
    out: &Path,
    compression: Compression,
    password: &str,
    progress: Option<&ProgressFn>,
    report: &mut WriteReport,
) -> Result<()> {
    let mut lw = LegacyWriter::new(Vec::new())?;
    let total = sources.len();
    for (i, src) in sources.iter().enumerate() {
        if i % PROGRESS_EVERY == 0 {
            report_progress(progress, "archive", i, total);
        }
        match read_source_for_intermediate(src) {
            Some((path, mtime, content)) => {
                lw.add_file(&path, mtime, &content)?;
                report.entries_written += 1;
            }
            None => report.entries_skipped += 1,
        }
    }
    report_progress(progress, "archive", total, total);

    let logical = lw.into_inner();
    report.logical_bytes = logical.len() as u64;

    let body = match compression {
        Compression::Gzip => gzipc::compress_all(&logical)?,
        _ => logical,
    };
    let env = envelope::encrypt(&body, password)?;
    let payload = env.to_bytes();

    let desc = EncryptionDesc {
        algo: ALGO_CHACHA20_POLY1305,
        kdf: KDF_ARGON2ID,
        salt: env.salt,
        nonce: env.nonce,
        ops: kdf::OPS,
        mem_kib: kdf::MEM_KIB,
    };
    let mut header = Header::new(compression, desc);
    header.tar_size = payload.len() as u64;
    // for encrypted archives the checksum covers the stored ciphertext
    header.checksum = sha256::digest(&payload);
    report.payload_bytes = header.tar_size;

    let mut f = File::create(out)?;
    header.write_to(&mut f)?;
    f.write_all(&payload)?;
    f.flush()?;
    Ok(())
}

fn read_source_for_intermediate(src: &Path) -> Option<(String, i64, Vec<u8>)> {
    let md = match fs::symlink_metadata(src) {
        Ok(md) => md,
        Err(e) => {
            warn!(path = %src.display(), error = %e, "skipping unreadable source");
            return None;
        }
    };
    if md.file_type().is_symlink() {
        warn!(
            path = %src.display(),
            "symbolic links have no record form in the encrypted intermediate, skipping"
        );
        return None;
    }
    if !md.is_file() {
        return None;
    }
    let Some(path) = src.to_str() else {
        warn!(path = %src.display(), "skipping non-UTF-8 path in textual intermediate");
        return None;
    };
    match fs::read(src) {
        Ok(content) => Some((path.to_string(), mtime_from(&md), content)),
        Err(e) => {
            warn!(path = %src.display(), error = %e, "skipping unreadable source");
            None
        }
    }
}

fn mode_from(md: &fs::Metadata) -> u32 {
    md.permissions().mode()
}

fn mtime_from(md: &fs::Metadata) -> i64 {
    md.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
