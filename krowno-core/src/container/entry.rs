use std::io::Write;

pub const TAG_FILE: u8 = 1;
pub const TAG_SYMLINK: u8 = 2;

/// Upper bound on path and symlink-target byte lengths; anything larger
/// is a malformed entry, not a real filesystem path.
pub const MAX_PATH_LEN: u32 = 4096;

/// Parsed payload entry. `path` is already sanitised when produced by
/// the reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub mode: u64,
    pub mtime: i64,
    pub kind: EntryKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File { size: u64 },
    Symlink { target: Vec<u8> },
}

impl Entry {
    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, EntryKind::Symlink { .. })
    }

    pub fn size(&self) -> u64 {
        match &self.kind {
            EntryKind::File { size } => *size,
            EntryKind::Symlink { .. } => 0,
        }
    }
}

/// Emit a tag-1 header. Content bytes follow separately so big files can
/// stream through without being held in memory.
pub fn write_file_header(
    mut w: impl Write,
    path: &[u8],
    mode: u64,
    mtime: i64,
    size: u64,
) -> std::io::Result<()> {
    w.write_all(&[TAG_FILE])?;
    w.write_all(&(path.len() as u32).to_le_bytes())?;
    w.write_all(path)?;
    w.write_all(&mode.to_le_bytes())?;
    w.write_all(&mtime.to_le_bytes())?;
    w.write_all(&size.to_le_bytes())?;
    Ok(())
}

/// Emit a complete tag-2 record. The target bytes go in exactly as the
/// OS returned them, absolute or relative.
pub fn write_symlink(
    mut w: impl Write,
    path: &[u8],
    mtime: i64,
    target: &[u8],
) -> std::io::Result<()> {
    w.write_all(&[TAG_SYMLINK])?;
    w.write_all(&(path.len() as u32).to_le_bytes())?;
    w.write_all(path)?;
    w.write_all(&0u64.to_le_bytes())?;
    w.write_all(&mtime.to_le_bytes())?;
    w.write_all(&(target.len() as u32).to_le_bytes())?;
    w.write_all(target)?;
    Ok(())
}
