use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::container::sidecar::{
    self, FLATPAKS_PREFIX, META_PREFIX, MetaSidecar, PACKAGES_PREFIX,
};
use crate::error::Result;
use crate::pkg::distro::{self, Distro};
use crate::progress::{ProgressFn, report as report_progress};
use crate::restore::privilege::{self, PrivilegeOps, SudoOps};

/// Default remote for sandboxed-application installs.
const FLATPAK_SOURCE: &str = "flathub";

/// Everything the mapper learned and decided while translating an
/// extracted tree into a live environment.
#[derive(Clone, Debug, Default)]
pub struct RestoreContext {
    pub source_username: Option<String>,
    pub source_hostname: Option<String>,
    pub source_home: Option<String>,
    pub target_username: Option<String>,
    pub target_home: PathBuf,
    pub packages: Vec<String>,
    pub flatpaks: Vec<String>,
}

pub struct RestoreOptions<'a> {
    pub target_username: Option<&'a str>,
    /// Detected from `/etc/os-release` when absent.
    pub distro: Option<Distro>,
    pub privilege: Option<&'a dyn PrivilegeOps>,
}

impl Default for RestoreOptions<'_> {
    fn default() -> Self {
        Self {
            target_username: None,
            distro: None,
            privilege: None,
        }
    }
}

/// Map an extracted tree onto the target user environment: identity
/// sidecar, home subtree, package manifests, sandboxed apps, ownership,
/// hostname. Every stage after the home resolution is best-effort and
/// individually isolated; a failed package install never fails the
/// restore.
pub fn restore_environment(
    restore_dir: &Path,
    opts: &RestoreOptions,
    progress: Option<&ProgressFn>,
) -> Result<RestoreContext> {
    let mut ctx = RestoreContext {
        target_username: opts.target_username.map(str::to_string),
        ..Default::default()
    };

    // 1. identity sidecar
    if let Some(meta) = read_meta_sidecar(restore_dir) {
        ctx.source_username = Some(meta.username);
        ctx.source_hostname = Some(meta.hostname);
        ctx.source_home = Some(meta.home);
    }

    // 2. fall back to the first extracted home directory
    if ctx.source_username.is_none() {
        ctx.source_username = first_home_subdir(restore_dir);
    }

    // 3. target home
    ctx.target_home = match opts.target_username {
        Some(user) => PathBuf::from("/home").join(user),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .ok_or_else(|| std::io::Error::other("cannot determine target home"))?,
    };

    // 4. home subtree
    if let Some(source_user) = ctx.source_username.clone() {
        let source_home = restore_dir.join("home").join(&source_user);
        if source_home.is_dir() {
            copy_home_tree(&source_home, &ctx.target_home, progress);
        } else {
            warn!(path = %source_home.display(), "no home subtree to map");
        }
    }

    // 5. package manifests
    ctx.packages = collect_sidecar_lines(restore_dir, PACKAGES_PREFIX, sidecar::parse_package_lines);
    install_manifest_packages(&ctx.packages, opts.distro, progress);

    // 6. sandboxed applications
    ctx.flatpaks = collect_sidecar_lines(restore_dir, FLATPAKS_PREFIX, sidecar::parse_flatpak_list);
    install_flatpaks(&ctx.flatpaks, progress);

    // 7. ownership
    static SUDO: SudoOps = SudoOps;
    let privilege: &dyn PrivilegeOps = opts.privilege.unwrap_or(&SUDO);
    if let Some(user) = opts.target_username {
        reown_target_home(user, &ctx.target_home, privilege, progress);
    }

    // 8. hostname
    if let Some(hostname) = ctx.source_hostname.as_deref() {
        match privilege.set_hostname(hostname) {
            Ok(()) => info!(hostname, "hostname applied"),
            Err(e) => warn!(hostname, error = %e, "hostname change failed"),
        }
        report_progress(progress, "hostname", 1, 1);
    }

    Ok(ctx)
}

fn read_meta_sidecar(restore_dir: &Path) -> Option<MetaSidecar> {
    for path in sidecar::find_sidecars(restore_dir, META_PREFIX) {
        match fs::read_to_string(&path) {
            Ok(text) => match MetaSidecar::from_json(&text) {
                Ok(meta) => return Some(meta),
                Err(e) => warn!(path = %path.display(), error = %e, "unparseable metadata sidecar"),
            },
            Err(e) => warn!(path = %path.display(), error = %e, "unreadable metadata sidecar"),
        }
    }
    None
}

fn first_home_subdir(restore_dir: &Path) -> Option<String> {
    let home_root = restore_dir.join("home");
    let mut names: Vec<String> = fs::read_dir(&home_root)
        .ok()?
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names.into_iter().next()
}

/// Copy regular files and directories from the extracted home into the
/// target home. Symlinks and special files were already materialised by
/// the extractor and are skipped here.
fn copy_home_tree(source: &Path, target: &Path, progress: Option<&ProgressFn>) {
    let entries: Vec<_> = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .collect();
    let total = entries.len();
    let mut done = 0usize;

    for entry in entries {
        done += 1;
        let Ok(rel) = entry.path().strip_prefix(source) else {
            continue;
        };
        let dst = target.join(rel);
        let file_type = entry.file_type();
        let outcome = if file_type.is_dir() {
            fs::create_dir_all(&dst)
        } else if file_type.is_file() {
            match dst.parent() {
                Some(parent) => fs::create_dir_all(parent)
                    .and_then(|_| fs::copy(entry.path(), &dst).map(|_| ())),
                None => Ok(()),
            }
        } else {
            Ok(())
        };
        if let Err(e) = outcome {
            warn!(path = %entry.path().display(), error = %e, "home entry not copied");
        }
        if done % 100 == 0 {
            report_progress(progress, "home", done, total);
        }
    }
    report_progress(progress, "home", total, total);
}

fn collect_sidecar_lines(
    restore_dir: &Path,
    prefix: &str,
    parse: fn(&str) -> Vec<String>,
) -> Vec<String> {
    let mut out = Vec::new();
    for path in sidecar::find_sidecars(restore_dir, prefix) {
        match fs::read_to_string(&path) {
            Ok(text) => out.extend(parse(&text)),
            Err(e) => warn!(path = %path.display(), error = %e, "unreadable sidecar"),
        }
    }
    out.dedup();
    out
}

fn install_manifest_packages(
    packages: &[String],
    distro: Option<Distro>,
    progress: Option<&ProgressFn>,
) {
    if packages.is_empty() {
        return;
    }
    let distro = match distro.map(Ok).unwrap_or_else(Distro::detect) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "cannot determine distribution, skipping package install");
            return;
        }
    };
    report_progress(progress, "packages", 0, packages.len());
    match distro::install_packages(distro, packages) {
        Ok(()) => info!(count = packages.len(), "packages installed"),
        Err(e) => warn!(error = %e, "package install failed"),
    }
    report_progress(progress, "packages", packages.len(), packages.len());
}

fn install_flatpaks(ids: &[String], progress: Option<&ProgressFn>) {
    let total = ids.len();
    for (i, id) in ids.iter().enumerate() {
        let result = Command::new("flatpak")
            .args(["install", "-y", FLATPAK_SOURCE, id])
            .status();
        match result {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(id = %id, %status, "flatpak install failed"),
            Err(e) => warn!(id = %id, error = %e, "flatpak unavailable"),
        }
        report_progress(progress, "flatpaks", i + 1, total);
    }
}

fn reown_target_home(
    user: &str,
    target_home: &Path,
    privilege: &dyn PrivilegeOps,
    progress: Option<&ProgressFn>,
) {
    match privilege::lookup_user(user) {
        Ok(Some((uid, gid))) => {
            if let Err(e) = privilege.chown_recursive(target_home, uid, gid) {
                warn!(user, error = %e, "ownership change failed");
            }
        }
        Ok(None) => warn!(user, "target user not in account database"),
        Err(e) => warn!(user, error = %e, "account database unreadable"),
    }
    report_progress(progress, "ownership", 1, 1);
}
