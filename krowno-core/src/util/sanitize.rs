use crate::error::{KrownoError, Result};

/// Sanitise an entry path before it touches the filesystem.
///
/// Leading `/` is stripped; the rest is split on `/` and every segment
/// must be non-empty and neither `.` nor `..`. An empty result rejects
/// the entry, and with it the whole archive. This is the sole
/// path-traversal mitigation on the read side and must run for every
/// emitted path.
pub fn sanitize_entry_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(KrownoError::ArchiveFormat(format!(
            "empty entry path {raw:?}"
        )));
    }
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(KrownoError::ArchiveFormat(format!(
                "illegal segment in entry path {raw:?}"
            )));
        }
    }
    Ok(trimmed.to_string())
}
