use std::fs;
use std::process::Command;

use tracing::warn;

use crate::error::{KrownoError, Result};

const OS_RELEASE: &str = "/etc/os-release";

/// rpm `%{NAME}-%{VERSION}-%{RELEASE}.%{ARCH}` trailing architectures.
const ARCH_SUFFIXES: &[&str] = &[
    "x86_64", "i686", "i586", "aarch64", "armv7hl", "ppc64le", "s390x", "riscv64", "noarch",
];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Distro {
    Fedora,
    Ubuntu,
    Debian,
    Arch,
    OpenSuse,
    Nix,
}

impl Distro {
    pub const ALL: [Distro; 6] = [
        Distro::Fedora,
        Distro::Ubuntu,
        Distro::Debian,
        Distro::Arch,
        Distro::OpenSuse,
        Distro::Nix,
    ];

    /// Key used in the mapping cache file.
    pub fn key(self) -> &'static str {
        match self {
            Distro::Fedora => "fedora",
            Distro::Ubuntu => "ubuntu",
            Distro::Debian => "debian",
            Distro::Arch => "arch",
            Distro::OpenSuse => "opensuse",
            Distro::Nix => "nixos",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.key() == key)
    }

    /// Only these distros are persisted in the mapping cache file.
    pub fn is_cacheable(self) -> bool {
        !matches!(self, Distro::Nix)
    }

    pub fn uses_rpm(self) -> bool {
        matches!(self, Distro::Fedora | Distro::OpenSuse)
    }

    pub fn package_manager(self) -> &'static str {
        match self {
            Distro::Fedora => "dnf",
            Distro::Ubuntu | Distro::Debian => "apt-get",
            Distro::Arch => "pacman",
            Distro::OpenSuse => "zypper",
            Distro::Nix => "nix-env",
        }
    }

    pub fn install_argv(self, packages: &[String]) -> Vec<String> {
        let mut argv: Vec<String> = match self {
            Distro::Fedora => vec!["dnf".into(), "install".into(), "-y".into()],
            Distro::Ubuntu | Distro::Debian => {
                vec!["apt-get".into(), "install".into(), "-y".into()]
            }
            Distro::Arch => vec!["pacman".into(), "-S".into(), "--noconfirm".into()],
            Distro::OpenSuse => vec![
                "zypper".into(),
                "--non-interactive".into(),
                "install".into(),
            ],
            Distro::Nix => vec!["nix-env".into(), "-i".into()],
        };
        argv.extend(packages.iter().cloned());
        argv
    }

    pub fn list_argv(self) -> &'static [&'static str] {
        match self {
            Distro::Fedora | Distro::OpenSuse => &["rpm", "-qa"],
            Distro::Ubuntu | Distro::Debian => &["dpkg-query", "-W"],
            Distro::Arch => &["pacman", "-Qqe"],
            Distro::Nix => &["nix-env", "-q"],
        }
    }

    /// Package-search endpoint probed during online discovery.
    pub fn search_url(self, candidate: &str) -> String {
        match self {
            Distro::Fedora => {
                format!("https://packages.fedoraproject.org/search?query={candidate}")
            }
            Distro::Ubuntu => {
                format!("https://packages.ubuntu.com/search?keywords={candidate}")
            }
            Distro::Debian => {
                format!("https://packages.debian.org/search?keywords={candidate}")
            }
            Distro::Arch => {
                format!("https://archlinux.org/packages/search/json/?name={candidate}")
            }
            Distro::OpenSuse => {
                format!("https://software.opensuse.org/search?q={candidate}")
            }
            Distro::Nix => format!("https://search.nixos.org/packages?query={candidate}"),
        }
    }

    /// Identify the running distribution from `/etc/os-release`.
    pub fn detect() -> Result<Self> {
        let text = fs::read_to_string(OS_RELEASE)?;
        Self::from_os_release(&text).ok_or_else(|| {
            let id = os_release_field(&text, "ID").unwrap_or_else(|| "unknown".into());
            KrownoError::UnsupportedDistribution(id)
        })
    }

    pub fn from_os_release(text: &str) -> Option<Self> {
        let id = os_release_field(text, "ID")?;
        if let Some(d) = match_distro_id(&id) {
            return Some(d);
        }
        let like = os_release_field(text, "ID_LIKE").unwrap_or_default();
        like.split_whitespace().find_map(match_distro_id)
    }
}

fn match_distro_id(id: &str) -> Option<Distro> {
    match id {
        "fedora" | "rhel" | "centos" | "rocky" | "almalinux" => Some(Distro::Fedora),
        "ubuntu" | "linuxmint" | "pop" => Some(Distro::Ubuntu),
        "debian" => Some(Distro::Debian),
        "arch" | "manjaro" | "endeavouros" => Some(Distro::Arch),
        "opensuse" | "opensuse-tumbleweed" | "opensuse-leap" | "suse" => Some(Distro::OpenSuse),
        "nixos" => Some(Distro::Nix),
        _ => None,
    }
}

fn os_release_field(text: &str, key: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let value = line.strip_prefix(key)?.strip_prefix('=')?;
        Some(value.trim().trim_matches('"').to_string())
    })
}

/// Install packages through the native package manager with inherited
/// stdio. A non-zero exit means at least one name was not installable.
pub fn install_packages(distro: Distro, packages: &[String]) -> Result<()> {
    if packages.is_empty() {
        return Ok(());
    }
    let argv = distro.install_argv(packages);
    let status = Command::new(&argv[0])
        .args(&argv[1..])
        .status()
        .map_err(|e| spawn_error(e, &argv[0]))?;
    if !status.success() {
        return Err(KrownoError::PackageNotFound(packages.join(" ")));
    }
    Ok(())
}

/// Names currently installed, one per line from the native list
/// command. Malformed lines are dropped rather than surfaced.
pub fn installed_packages(distro: Distro) -> Result<Vec<String>> {
    let argv = distro.list_argv();
    let output = Command::new(argv[0])
        .args(&argv[1..])
        .output()
        .map_err(|e| spawn_error(e, argv[0]))?;
    if !output.status.success() {
        warn!(
            command = argv[0],
            code = output.status.code(),
            "package list command exited non-zero"
        );
    }
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(parse_package_list(&text, distro))
}

pub fn parse_package_list(text: &str, distro: Distro) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|name| {
            if distro.uses_rpm() {
                strip_arch_suffix(name)
            } else {
                name
            }
        })
        .filter(|name| is_valid_package_name(name))
        .map(str::to_string)
        .collect()
}

fn strip_arch_suffix(name: &str) -> &str {
    if let Some((stem, suffix)) = name.rsplit_once('.')
        && ARCH_SUFFIXES.contains(&suffix)
    {
        return stem;
    }
    name
}

pub fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

fn spawn_error(e: std::io::Error, command: &str) -> KrownoError {
    if e.kind() == std::io::ErrorKind::NotFound {
        KrownoError::PackageManagerNotFound(command.to_string())
    } else {
        KrownoError::Io(e)
    }
}
