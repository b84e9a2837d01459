use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::Result;
use crate::pkg::distro::{self, Distro};
use crate::pkg::http::HttpClient;

pub const SIMILARITY_THRESHOLD: f64 = 0.7;

const PROBE_DELAY: Duration = Duration::from_millis(500);
const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(2);

const CACHE_FILE: &str = "package_mappings.json";

/// Distros with a column in the built-in seed table, in column order.
const SEED_COLUMNS: [Distro; 5] = [
    Distro::Fedora,
    Distro::Ubuntu,
    Distro::Debian,
    Distro::Arch,
    Distro::OpenSuse,
];

#[derive(Clone, Debug, Default)]
pub struct PackageMapping {
    pub canonical: String,
    pub names: BTreeMap<Distro, String>,
    pub description: Option<String>,
    pub category: String,
    /// Rough install share across the seed corpus, in `[0, 1]`.
    pub popularity: f32,
    pub last_verified: i64,
}

/// Canonical ↔ distro-specific package name resolver with a persistent
/// learned cache. Lookups run exact → fuzzy → online discovery →
/// verified identity, in that order, and every hit is folded back into
/// the in-memory table.
///
/// Not safe for concurrent mutation; callers serialise.
pub struct PackageResolver {
    mappings: BTreeMap<String, PackageMapping>,
    cache_path: Option<PathBuf>,
    http: Option<Box<dyn HttpClient>>,
    last_request: Option<Instant>,
    dirty: bool,
}

impl PackageResolver {
    /// Resolver with the default cache location
    /// (`~/.config/krowno/package_mappings.json`). Pass `None` for the
    /// client to run offline.
    pub fn new(http: Option<Box<dyn HttpClient>>) -> Self {
        let cache_path = dirs::config_dir().map(|d| d.join("krowno").join(CACHE_FILE));
        Self::with_cache_path(cache_path, http)
    }

    pub fn with_cache_path(
        cache_path: Option<PathBuf>,
        http: Option<Box<dyn HttpClient>>,
    ) -> Self {
        let mut resolver = Self {
            mappings: seed_mappings(),
            cache_path,
            http,
            last_request: None,
            dirty: false,
        };
        if let Some(path) = resolver.cache_path.clone()
            && let Err(e) = resolver.load_cache(&path)
        {
            warn!(path = %path.display(), error = %e, "mapping cache unreadable, starting from seed data");
        }
        resolver
    }

    pub fn is_online(&self) -> bool {
        self.http.is_some()
    }

    pub fn mapping(&self, canonical: &str) -> Option<&PackageMapping> {
        self.mappings.get(canonical)
    }

    /// Concrete package name for `pkg` on `target`, or `None` when
    /// every stage comes up empty. Deterministic between mutations.
    pub fn translate(&mut self, pkg: &str, target: Distro) -> Result<Option<String>> {
        // 1. exact table hit
        if let Some(name) = self
            .mappings
            .get(pkg)
            .and_then(|m| m.names.get(&target))
            .cloned()
        {
            self.remember(pkg, target, &name);
            return Ok(Some(name));
        }

        // 2. fuzzy match over canonical and stored per-distro names
        if let Some(name) = self.fuzzy_lookup(pkg, target) {
            self.remember(pkg, target, &name);
            return Ok(Some(name));
        }

        if self.is_online() {
            // 3. online discovery across candidate spellings
            if let Some(name) = self.discover_online(pkg, target) {
                self.remember(pkg, target, &name);
                return Ok(Some(name));
            }
            // 4. last resort: identical name, verified on the target
            if self.probe(target, pkg) {
                self.remember(pkg, target, pkg);
                return Ok(Some(pkg.to_string()));
            }
        }
        Ok(None)
    }

    /// Install one resolved name through the running distro's package
    /// manager.
    pub fn install(&self, name: &str) -> Result<()> {
        let current = Distro::detect()?;
        distro::install_packages(current, &[name.to_string()])
    }

    pub fn installed_packages(&self) -> Result<Vec<String>> {
        distro::installed_packages(Distro::detect()?)
    }

    fn fuzzy_lookup(&self, pkg: &str, target: Distro) -> Option<String> {
        let mut best: Option<(f64, &PackageMapping)> = None;
        for mapping in self.mappings.values() {
            let mut score = similarity(pkg, &mapping.canonical);
            for name in mapping.names.values() {
                score = score.max(similarity(pkg, name));
            }
            if score >= SIMILARITY_THRESHOLD
                && best.as_ref().is_none_or(|(s, _)| score > *s)
            {
                best = Some((score, mapping));
            }
        }
        let (score, mapping) = best?;
        debug!(
            pkg,
            canonical = %mapping.canonical,
            score,
            "fuzzy match"
        );
        mapping.names.get(&target).cloned()
    }

    fn discover_online(&mut self, pkg: &str, target: Distro) -> Option<String> {
        for (i, candidate) in candidate_patterns(pkg).iter().enumerate() {
            if i > 0 {
                thread::sleep(PROBE_DELAY);
            }
            if self.probe(target, candidate) {
                return Some(candidate.clone());
            }
        }
        None
    }

    /// One rate-limited probe of the target's package-search endpoint.
    /// 2xx/3xx means the candidate exists; failures are logged and read
    /// as a miss so later stages still run.
    fn probe(&mut self, target: Distro, candidate: &str) -> bool {
        self.throttle();
        let Some(http) = self.http.as_deref() else {
            return false;
        };
        let url = target.search_url(candidate);
        match http.get(&url) {
            Ok(resp) if resp.is_positive() => {
                debug!(candidate, url = %url, status = resp.status, "probe hit");
                true
            }
            Ok(resp) => {
                debug!(candidate, url = %url, status = resp.status, "probe miss");
                false
            }
            Err(e) => {
                warn!(candidate, url = %url, error = %e, "probe failed");
                false
            }
        }
    }

    fn throttle(&mut self) {
        if let Some(at) = self.last_request {
            let elapsed = at.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                thread::sleep(MIN_REQUEST_INTERVAL - elapsed);
            }
        }
        self.last_request = Some(Instant::now());
    }

    fn remember(&mut self, pkg: &str, target: Distro, name: &str) {
        let entry = self
            .mappings
            .entry(pkg.to_string())
            .or_insert_with(|| PackageMapping {
                canonical: pkg.to_string(),
                ..Default::default()
            });
        entry.names.insert(target, name.to_string());
        entry.last_verified = OffsetDateTime::now_utc().unix_timestamp();
        self.dirty = true;
    }

    fn load_cache(&mut self, path: &Path) -> Result<()> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            // no cache yet: warm-start from seed data only
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((canonical, names)) = parse_cache_line(line) else {
                warn!(line, "skipping malformed cache line");
                continue;
            };
            let entry = self
                .mappings
                .entry(canonical.clone())
                .or_insert_with(|| PackageMapping {
                    canonical,
                    ..Default::default()
                });
            for (d, name) in names {
                entry.names.insert(d, name);
            }
        }
        Ok(())
    }

    /// Persist the mapping table in its line-oriented form:
    /// `canonical|fedora:name|ubuntu:name|...`.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = String::from("# krowno package mappings\n");
        for (canonical, mapping) in &self.mappings {
            let fields: Vec<String> = mapping
                .names
                .iter()
                .filter(|(d, _)| d.is_cacheable())
                .map(|(d, name)| format!("{}:{}", d.key(), name))
                .collect();
            if fields.is_empty() {
                continue;
            }
            out.push_str(canonical);
            for field in &fields {
                out.push('|');
                out.push_str(field);
            }
            out.push('\n');
        }
        fs::write(path, out)?;
        Ok(())
    }
}

impl Drop for PackageResolver {
    fn drop(&mut self) {
        if self.dirty
            && let Err(e) = self.save()
        {
            warn!(error = %e, "failed to persist package mappings");
        }
    }
}

fn parse_cache_line(line: &str) -> Option<(String, Vec<(Distro, String)>)> {
    let mut fields = line.split('|');
    let canonical = fields.next()?.trim();
    if canonical.is_empty() {
        return None;
    }
    let mut names = Vec::new();
    for field in fields {
        let (key, name) = field.split_once(':')?;
        let name = name.trim();
        match Distro::from_key(key.trim()) {
            Some(d) if !name.is_empty() => names.push((d, name.to_string())),
            Some(_) => return None,
            None => {
                warn!(key, "unknown distro key in cache, dropping field");
            }
        }
    }
    Some((canonical.to_string(), names))
}

/// Candidate spellings probed in order during online discovery.
pub fn candidate_patterns(pkg: &str) -> [String; 5] {
    [
        pkg.to_string(),
        format!("lib{pkg}"),
        format!("{pkg}-dev"),
        format!("{pkg}-devel"),
        format!("lib{pkg}-dev"),
    ]
}

/// Levenshtein-based similarity in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let sub = prev[j] + usize::from(ca != cb);
            cur[j + 1] = sub.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

type SeedRow = (
    &'static str,
    [Option<&'static str>; 5],
    &'static str,
    &'static str,
    f32,
);

/// Built-in mapping seed: canonical name, per-distro names in
/// `SEED_COLUMNS` order, description, category, popularity.
const SEED: &[SeedRow] = &[
    ("firefox", [Some("firefox"), Some("firefox"), Some("firefox-esr"), Some("firefox"), Some("MozillaFirefox")], "Mozilla web browser", "browser", 0.95),
    ("chromium", [Some("chromium"), Some("chromium-browser"), Some("chromium"), Some("chromium"), Some("chromium")], "Chromium web browser", "browser", 0.80),
    ("vim", [Some("vim-enhanced"), Some("vim"), Some("vim"), Some("vim"), Some("vim")], "Vi improved text editor", "editor", 0.90),
    ("neovim", [Some("neovim"), Some("neovim"), Some("neovim"), Some("neovim"), Some("neovim")], "Hyperextensible vim fork", "editor", 0.70),
    ("emacs", [Some("emacs"), Some("emacs"), Some("emacs"), Some("emacs"), Some("emacs")], "GNU Emacs editor", "editor", 0.55),
    ("git", [Some("git"), Some("git"), Some("git"), Some("git"), Some("git")], "Distributed version control", "devel", 0.97),
    ("gcc", [Some("gcc"), Some("gcc"), Some("gcc"), Some("gcc"), Some("gcc")], "GNU compiler collection", "devel", 0.85),
    ("clang", [Some("clang"), Some("clang"), Some("clang"), Some("clang"), Some("clang")], "LLVM C/C++ compiler", "devel", 0.65),
    ("make", [Some("make"), Some("make"), Some("make"), Some("make"), Some("make")], "GNU make", "devel", 0.85),
    ("cmake", [Some("cmake"), Some("cmake"), Some("cmake"), Some("cmake"), Some("cmake")], "Cross-platform build system", "devel", 0.70),
    ("python3", [Some("python3"), Some("python3"), Some("python3"), Some("python"), Some("python3")], "Python interpreter", "runtime", 0.95),
    ("python3-pip", [Some("python3-pip"), Some("python3-pip"), Some("python3-pip"), Some("python-pip"), Some("python3-pip")], "Python package installer", "runtime", 0.85),
    ("nodejs", [Some("nodejs"), Some("nodejs"), Some("nodejs"), Some("nodejs"), Some("nodejs")], "JavaScript runtime", "runtime", 0.75),
    ("docker", [Some("moby-engine"), Some("docker.io"), Some("docker.io"), Some("docker"), Some("docker")], "Container engine", "devel", 0.80),
    ("podman", [Some("podman"), Some("podman"), Some("podman"), Some("podman"), Some("podman")], "Daemonless container engine", "devel", 0.60),
    ("apache", [Some("httpd"), Some("apache2"), Some("apache2"), Some("apache"), Some("apache2")], "Apache HTTP server", "server", 0.70),
    ("openssh-server", [Some("openssh-server"), Some("openssh-server"), Some("openssh-server"), Some("openssh"), Some("openssh")], "OpenSSH daemon", "server", 0.85),
    ("htop", [Some("htop"), Some("htop"), Some("htop"), Some("htop"), Some("htop")], "Interactive process viewer", "utility", 0.75),
    ("tmux", [Some("tmux"), Some("tmux"), Some("tmux"), Some("tmux"), Some("tmux")], "Terminal multiplexer", "utility", 0.70),
    ("zsh", [Some("zsh"), Some("zsh"), Some("zsh"), Some("zsh"), Some("zsh")], "Z shell", "shell", 0.65),
    ("curl", [Some("curl"), Some("curl"), Some("curl"), Some("curl"), Some("curl")], "URL transfer tool", "network", 0.90),
    ("wget", [Some("wget"), Some("wget"), Some("wget"), Some("wget"), Some("wget")], "Network downloader", "network", 0.80),
    ("vlc", [Some("vlc"), Some("vlc"), Some("vlc"), Some("vlc"), Some("vlc")], "VLC media player", "multimedia", 0.75),
    ("gimp", [Some("gimp"), Some("gimp"), Some("gimp"), Some("gimp"), Some("gimp")], "GNU image manipulation program", "multimedia", 0.60),
    ("libreoffice", [Some("libreoffice"), Some("libreoffice"), Some("libreoffice"), Some("libreoffice-fresh"), Some("libreoffice")], "Office suite", "office", 0.65),
    ("openjdk", [Some("java-21-openjdk"), Some("default-jdk"), Some("default-jdk"), Some("jdk-openjdk"), Some("java-21-openjdk")], "OpenJDK runtime and tools", "runtime", 0.60),
    ("sqlite", [Some("sqlite"), Some("sqlite3"), Some("sqlite3"), Some("sqlite"), Some("sqlite3")], "Embedded SQL database", "devel", 0.70),
];

fn seed_mappings() -> BTreeMap<String, PackageMapping> {
    let mut out = BTreeMap::new();
    for (canonical, names, description, category, popularity) in SEED {
        let mut mapping = PackageMapping {
            canonical: (*canonical).to_string(),
            description: Some((*description).to_string()),
            category: (*category).to_string(),
            popularity: *popularity,
            ..Default::default()
        };
        for (distro, name) in SEED_COLUMNS.iter().zip(names.iter()) {
            if let Some(name) = name {
                mapping.names.insert(*distro, (*name).to_string());
            }
        }
        out.insert((*canonical).to_string(), mapping);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::http::{HttpError, HttpResponse};
    use std::sync::Mutex;

    struct FakeClient {
        hits: Vec<&'static str>,
        log: Mutex<Vec<String>>,
    }

    impl FakeClient {
        fn hitting(hits: Vec<&'static str>) -> Self {
            Self {
                hits,
                log: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for FakeClient {
        fn get(&self, url: &str) -> std::result::Result<HttpResponse, HttpError> {
            if let Ok(mut log) = self.log.lock() {
                log.push(url.to_string());
            }
            let status = if self.hits.iter().any(|h| url.ends_with(h)) {
                200
            } else {
                404
            };
            Ok(HttpResponse {
                status,
                headers: Vec::new(),
                body: Vec::new(),
            })
        }
    }

    fn offline() -> PackageResolver {
        PackageResolver::with_cache_path(None, None)
    }

    #[test]
    fn exact_lookup_wins() {
        let mut r = offline();
        assert_eq!(
            r.translate("firefox", Distro::Debian).unwrap(),
            Some("firefox-esr".to_string())
        );
        assert_eq!(
            r.translate("apache", Distro::Fedora).unwrap(),
            Some("httpd".to_string())
        );
    }

    #[test]
    fn translate_is_deterministic_between_mutations() {
        let mut r = offline();
        let a = r.translate("vim", Distro::Fedora).unwrap();
        let b = r.translate("vim", Distro::Fedora).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Some("vim-enhanced".to_string()));
    }

    #[test]
    fn fuzzy_match_bridges_typos() {
        let mut r = offline();
        // one edit away from "firefox"
        assert_eq!(
            r.translate("firefoxx", Distro::Arch).unwrap(),
            Some("firefox".to_string())
        );
    }

    #[test]
    fn offline_resolver_gives_up_after_fuzzy() {
        let mut r = offline();
        assert_eq!(r.translate("left-pad", Distro::Arch).unwrap(), None);
    }

    #[test]
    fn online_discovery_caches_the_hit() {
        let client = FakeClient::hitting(vec!["name=zlib"]);
        let mut r = PackageResolver::with_cache_path(None, Some(Box::new(client)));
        assert_eq!(
            r.translate("zlib", Distro::Arch).unwrap(),
            Some("zlib".to_string())
        );
        // now in the table, no further probe needed
        let mapping = r.mapping("zlib").expect("cached mapping");
        assert_eq!(mapping.names.get(&Distro::Arch).map(String::as_str), Some("zlib"));
        assert!(mapping.last_verified > 0);
    }

    #[test]
    fn probe_patterns_in_documented_order() {
        assert_eq!(
            candidate_patterns("zlib"),
            [
                "zlib".to_string(),
                "libzlib".to_string(),
                "zlib-dev".to_string(),
                "zlib-devel".to_string(),
                "libzlib-dev".to_string(),
            ]
        );
    }

    #[test]
    fn similarity_metric_behaves() {
        assert_eq!(similarity("git", "git"), 1.0);
        assert!(similarity("firefox", "firefoxx") > SIMILARITY_THRESHOLD);
        assert!(similarity("vim", "libreoffice") < SIMILARITY_THRESHOLD);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn cache_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("package_mappings.json");
        {
            let mut r =
                PackageResolver::with_cache_path(Some(cache.clone()), None);
            r.remember("mytool", Distro::Ubuntu, "mytool-bin");
            r.save().unwrap();
        }
        let text = fs::read_to_string(&cache).unwrap();
        assert!(text.contains("mytool|ubuntu:mytool-bin"));

        let r = PackageResolver::with_cache_path(Some(cache), None);
        let m = r.mapping("mytool").expect("reloaded mapping");
        assert_eq!(
            m.names.get(&Distro::Ubuntu).map(String::as_str),
            Some("mytool-bin")
        );
    }

    #[test]
    fn cache_lines_parse_and_reject() {
        let (canonical, names) =
            parse_cache_line("htop|fedora:htop|arch:htop").unwrap();
        assert_eq!(canonical, "htop");
        assert_eq!(names.len(), 2);

        // unknown distro keys are dropped, not fatal
        let (_, names) = parse_cache_line("x|gentoo:x|debian:x").unwrap();
        assert_eq!(names, vec![(Distro::Debian, "x".to_string())]);

        assert!(parse_cache_line("").is_none());
        assert!(parse_cache_line("x|nocolon").is_none());
    }

    #[test]
    fn missing_cache_file_warm_starts_from_seed() {
        let dir = tempfile::tempdir().unwrap();
        let r = PackageResolver::with_cache_path(
            Some(dir.path().join("absent.json")),
            None,
        );
        assert!(r.mapping("git").is_some());
    }
}
