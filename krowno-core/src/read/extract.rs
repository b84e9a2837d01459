use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::codec::{Compression, gzipc};
use crate::container::entry::EntryKind;
use crate::container::header::{HEADER_LEN, Header, VERSION, VERSION_LEGACY};
use crate::container::legacy::LegacyReader;
use crate::crypto::envelope::{self, Envelope};
use crate::error::{KrownoError, Result};
use crate::hash::sha256;
use crate::read::stream::EntryReader;
use crate::util::hash_io::LimitedReader;

#[derive(Clone, Default)]
pub struct ExtractOptions<'a> {
    pub password: Option<&'a str>,
    /// Selective mode: only tag-1 entries whose sanitised path is in the
    /// set are written. Checksum verification is skipped in this mode.
    pub select: Option<HashSet<String>>,
}

/// Open the container and decode its header. The file is left
/// positioned right after the header.
pub(crate) fn open_archive(path: &Path) -> Result<(File, Header)> {
    let mut f = File::open(path).map_err(|e| KrownoError::from_io_path(e, path))?;
    let header = Header::read_from(&mut f)?;
    Ok((f, header))
}

/// Read the whole payload, verify the on-disk checksum, then peel
/// encryption and compression to recover the logical stream. This is
/// the only path for encrypted and version-1 archives.
pub(crate) fn load_logical_payload(
    f: &mut File,
    header: &Header,
    password: Option<&str>,
) -> Result<Vec<u8>> {
    f.seek(SeekFrom::Start(HEADER_LEN))?;
    let mut payload = vec![0u8; header.tar_size as usize];
    f.read_exact(&mut payload).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            KrownoError::ArchiveFormat("payload truncated".into())
        }
        _ => KrownoError::Io(e),
    })?;

    if sha256::digest(&payload) != header.checksum {
        return Err(KrownoError::ChecksumMismatch);
    }

    let mut logical = payload;
    if header.encryption.is_encrypted() {
        let pw = password.ok_or_else(|| {
            KrownoError::DecryptionFailed("archive is encrypted and no password was given".into())
        })?;
        let env = Envelope::from_bytes(&logical)?;
        logical = envelope::decrypt(&env, pw)?;
    }

    match header.compression {
        Compression::None => {}
        Compression::Gzip => logical = gzipc::decompress_all(&logical)?,
        other => {
            return Err(KrownoError::DecompressionFailed(format!(
                "codec not supported: {other:?}"
            )));
        }
    }
    Ok(logical)
}

/// Extract an archive into `dest`, verifying the end-to-end checksum on
/// full (non-selective) passes over version-2 payloads.
pub fn extract(archive: &Path, dest: &Path, opts: Option<&ExtractOptions>) -> Result<()> {
    let (mut f, header) = open_archive(archive)?;

    if header.version == VERSION_LEGACY || header.encryption.is_encrypted() {
        return extract_buffered(&mut f, &header, dest, opts);
    }
    if header.version != VERSION {
        return Err(KrownoError::UnsupportedVersion(header.version));
    }

    let select = opts.and_then(|o| o.select.as_ref());

    f.seek(SeekFrom::Start(HEADER_LEN))?;
    let limited = LimitedReader::new(&mut f, header.tar_size);
    let mut reader = EntryReader::new(limited, header.compression)?;

    while let Some(entry) = reader.next_entry()? {
        match entry.kind {
            EntryKind::File { size } => {
                let wanted = select.is_none_or(|s| s.contains(&entry.path));
                if wanted {
                    let outp = dest.join(&entry.path);
                    if let Some(parent) = outp.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    let mut outf = File::create(&outp)?;
                    reader.copy_content(size, &mut outf)?;
                    fs::set_permissions(
                        &outp,
                        fs::Permissions::from_mode((entry.mode & 0o7777) as u32),
                    )?;
                } else {
                    reader.skip_content(size)?;
                }
            }
            EntryKind::Symlink { ref target } => {
                if select.is_none() {
                    let outp = dest.join(&entry.path);
                    if let Some(parent) = outp.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    if fs::symlink_metadata(&outp).is_ok() {
                        fs::remove_file(&outp)?;
                    }
                    std::os::unix::fs::symlink(OsStr::from_bytes(target), &outp)?;
                }
            }
        }
    }

    if select.is_none() {
        let digest = reader.finalize();
        if digest != header.checksum {
            return Err(KrownoError::ChecksumMismatch);
        }
    }
    Ok(())
}

fn extract_buffered(
    f: &mut File,
    header: &Header,
    dest: &Path,
    opts: Option<&ExtractOptions<'_>>,
) -> Result<()> {
    let password = opts.and_then(|o| o.password);
    let select = opts.and_then(|o| o.select.as_ref());
    let logical = load_logical_payload(f, header, password)?;

    let mut reader = LegacyReader::new(&logical)?;
    while let Some((entry, content)) = reader.next()? {
        if select.is_none_or(|s| s.contains(&entry.path)) {
            let outp = dest.join(&entry.path);
            if let Some(parent) = outp.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&outp, content)?;
        }
    }
    Ok(())
}
