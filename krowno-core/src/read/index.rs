use std::io::{Seek, SeekFrom};
use std::path::Path;

use crate::container::entry::EntryKind;
use crate::container::header::{HEADER_LEN, VERSION, VERSION_LEGACY};
use crate::container::legacy::LegacyReader;
use crate::error::{KrownoError, Result};
use crate::read::extract::{ExtractOptions, load_logical_payload, open_archive};
use crate::read::stream::EntryReader;
use crate::util::hash_io::LimitedReader;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub size: u64,
    pub mtime: i64,
    pub is_symlink: bool,
}

/// Walk the archive without creating any files. Content bytes still
/// feed the running hash, so the final checksum check stays
/// authoritative for version-2 payloads.
pub fn index(archive: &Path, opts: Option<&ExtractOptions>) -> Result<Vec<IndexEntry>> {
    let (mut f, header) = open_archive(archive)?;

    if header.version == VERSION_LEGACY || header.encryption.is_encrypted() {
        let logical = load_logical_payload(&mut f, &header, opts.and_then(|o| o.password))?;
        let mut reader = LegacyReader::new(&logical)?;
        let mut out = Vec::new();
        while let Some((entry, _content)) = reader.next()? {
            out.push(IndexEntry {
                path: entry.path,
                size: entry.size,
                mtime: entry.mtime,
                is_symlink: false,
            });
        }
        return Ok(out);
    }
    if header.version != VERSION {
        return Err(KrownoError::UnsupportedVersion(header.version));
    }

    f.seek(SeekFrom::Start(HEADER_LEN))?;
    let limited = LimitedReader::new(&mut f, header.tar_size);
    let mut reader = EntryReader::new(limited, header.compression)?;

    let mut out = Vec::new();
    while let Some(entry) = reader.next_entry()? {
        let record = IndexEntry {
            path: entry.path.clone(),
            size: entry.size(),
            mtime: entry.mtime,
            is_symlink: entry.is_symlink(),
        };
        if let EntryKind::File { size } = entry.kind {
            reader.skip_content(size)?;
        }
        out.push(record);
    }

    if reader.finalize() != header.checksum {
        return Err(KrownoError::ChecksumMismatch);
    }
    Ok(out)
}
