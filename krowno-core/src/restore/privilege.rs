use std::fs;
use std::path::Path;
use std::process::Command;

use walkdir::WalkDir;

use crate::error::Result;

/// Operations that may need elevated rights during a restore. The
/// mapper only talks to this seam; hosts pick the implementation that
/// matches how the process runs.
pub trait PrivilegeOps {
    fn chown_recursive(&self, root: &Path, uid: u32, gid: u32) -> Result<()>;
    fn set_hostname(&self, hostname: &str) -> Result<()>;
}

/// Direct syscalls; works when the process already owns the tree or
/// runs as root.
pub struct DirectOps;

impl PrivilegeOps for DirectOps {
    fn chown_recursive(&self, root: &Path, uid: u32, gid: u32) -> Result<()> {
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(std::io::Error::other)?;
            // lchown so symlink entries change themselves, not their targets
            std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid))?;
        }
        Ok(())
    }

    fn set_hostname(&self, hostname: &str) -> Result<()> {
        run_checked(Command::new("hostnamectl").args(["set-hostname", hostname]))
    }
}

/// Escalation through sudo for unprivileged processes.
pub struct SudoOps;

impl PrivilegeOps for SudoOps {
    fn chown_recursive(&self, root: &Path, uid: u32, gid: u32) -> Result<()> {
        run_checked(
            Command::new("sudo")
                .arg("chown")
                .arg("-R")
                .arg(format!("{uid}:{gid}"))
                .arg(root),
        )
    }

    fn set_hostname(&self, hostname: &str) -> Result<()> {
        run_checked(Command::new("sudo").args(["hostnamectl", "set-hostname", hostname]))
    }
}

fn run_checked(cmd: &mut Command) -> Result<()> {
    let status = cmd.status()?;
    if !status.success() {
        return Err(std::io::Error::other(format!(
            "command exited with {status}"
        ))
        .into());
    }
    Ok(())
}

/// Resolve a username to `(uid, gid)` from the account database.
pub fn lookup_user(name: &str) -> Result<Option<(u32, u32)>> {
    let passwd = fs::read_to_string("/etc/passwd")?;
    for line in passwd.lines() {
        let mut fields = line.split(':');
        if fields.next() != Some(name) {
            continue;
        }
        let _password = fields.next();
        let uid = fields.next().and_then(|f| f.parse().ok());
        let gid = fields.next().and_then(|f| f.parse().ok());
        if let (Some(uid), Some(gid)) = (uid, gid) {
            return Ok(Some((uid, gid)));
        }
    }
    Ok(None)
}
