use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Result;

pub const META_PREFIX: &str = "krowno_meta_";
pub const PACKAGES_PREFIX: &str = "krowno_packages_";
pub const FLATPAKS_PREFIX: &str = "krowno_flatpaks_";

pub const PACKAGE_MANIFEST_MARKER: &str = "KROWNO_PACKAGE_MANIFEST";
pub const FLATPAK_LIST_MARKER: &str = "KROWNO_FLATPAK_LIST";

/// Identity sidecar embedded in the archive under `tmp/`. One JSON
/// object on a single line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaSidecar {
    pub hostname: String,
    pub username: String,
    pub home: String,
    pub timestamp: i64,
}

impl MetaSidecar {
    pub fn now(hostname: &str, username: &str, home: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            username: username.to_string(),
            home: home.to_string(),
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    pub fn to_json_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text.trim())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
    }
}

/// `KROWNO_PACKAGE_MANIFEST` header followed by `PKG:` lines.
pub fn write_package_manifest(
    mut w: impl Write,
    names: &[String],
    timestamp: i64,
) -> std::io::Result<()> {
    writeln!(w, "{PACKAGE_MANIFEST_MARKER}")?;
    writeln!(w, "TIMESTAMP: {timestamp}")?;
    writeln!(w, "TOTAL_PACKAGES: {}", names.len())?;
    for name in names {
        writeln!(w, "PKG: {name}")?;
    }
    Ok(())
}

/// Collect every `PKG: <name>` line. Tolerant by design: restore scans
/// are best-effort and a damaged header must not lose the list.
pub fn parse_package_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|l| l.strip_prefix("PKG: "))
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

/// `KROWNO_FLATPAK_LIST` header followed by one application id per line.
pub fn write_flatpak_list(
    mut w: impl Write,
    ids: &[String],
    timestamp: i64,
) -> std::io::Result<()> {
    writeln!(w, "{FLATPAK_LIST_MARKER}")?;
    writeln!(w, "TIMESTAMP: {timestamp}")?;
    writeln!(w, "COUNT: {}", ids.len())?;
    for id in ids {
        writeln!(w, "{id}")?;
    }
    Ok(())
}

pub fn parse_flatpak_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| {
            !l.is_empty()
                && *l != FLATPAK_LIST_MARKER
                && !l.starts_with("TIMESTAMP:")
                && !l.starts_with("COUNT:")
        })
        .map(str::to_string)
        .collect()
}

/// List `<root>/tmp/<prefix>*` files, sorted for deterministic pickup.
pub fn find_sidecars(root: &Path, prefix: &str) -> Vec<PathBuf> {
    let tmp = root.join("tmp");
    let mut out = Vec::new();
    if let Ok(entries) = fs::read_dir(&tmp) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(prefix) {
                out.push(entry.path());
            }
        }
    }
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_json_round_trip() {
        let meta = MetaSidecar {
            hostname: "box".into(),
            username: "alice".into(),
            home: "/home/alice".into(),
            timestamp: 1700000000,
        };
        let line = meta.to_json_line().unwrap();
        assert!(line.ends_with('\n'));
        assert!(!line.trim_end().contains('\n'));
        assert_eq!(MetaSidecar::from_json(&line).unwrap(), meta);
    }

    #[test]
    fn package_manifest_round_trip() {
        let names = vec!["vim".to_string(), "git".to_string()];
        let mut buf = Vec::new();
        write_package_manifest(&mut buf, &names, 42).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("KROWNO_PACKAGE_MANIFEST\nTIMESTAMP: 42\nTOTAL_PACKAGES: 2\n"));
        assert_eq!(parse_package_lines(&text), names);
    }

    #[test]
    fn flatpak_list_round_trip() {
        let ids = vec!["org.gimp.GIMP".to_string(), "org.videolan.VLC".to_string()];
        let mut buf = Vec::new();
        write_flatpak_list(&mut buf, &ids, 42).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(parse_flatpak_list(&text), ids);
    }

    #[test]
    fn sidecar_discovery_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("tmp");
        fs::create_dir_all(&tmp).unwrap();
        fs::write(tmp.join("krowno_meta_123"), "{}").unwrap();
        fs::write(tmp.join("krowno_packages_123"), "").unwrap();
        fs::write(tmp.join("unrelated"), "").unwrap();

        let found = find_sidecars(dir.path(), META_PREFIX);
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("krowno_meta_123"));
    }
}
