use std::{
    collections::HashMap,
    fs as std_fs,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
    time::SystemTime,
};

use semver::Version;

use crate::error::GitBinaryError;

/// Cache interaction policy for capability probes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CapabilityCachePolicy {
    /// Use a cached snapshot when the binary's fingerprint still matches; otherwise
    /// reprobe and write a fresh entry back.
    #[default]
    PreferCache,
    /// Skip cache reads and writes, forcing an isolated probe.
    Bypass,
}

/// Cache key for capability snapshots, derived from a canonicalized binary path so
/// symlinked installs collapse to one entry.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CapabilityCacheKey {
    pub binary_path: PathBuf,
}

/// File metadata used to invalidate a cached snapshot when the binary on disk changes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BinaryFingerprint {
    pub canonical_path: Option<PathBuf>,
    pub modified: Option<SystemTime>,
    pub len: Option<u64>,
}

/// Parsed `git --version` / `git-lfs --version` output plus the derived capability
/// gates this adapter cares about.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GitCapabilities {
    cache_key: CapabilityCacheKey,
    fingerprint: Option<BinaryFingerprint>,
    pub version: Option<Version>,
    pub lfs_version: Option<Version>,
}

/// Minimum git version that supports `-c http.extraheader` credential injection.
pub const MIN_CMDLINE_AUTH_HEADER: (u64, u64, u64) = (2, 9, 0);
/// Minimum git version that supports overriding `http.sslbackend` away from the
/// operating system's default TLS stack.
pub const MIN_TLS_BACKEND_OVERRIDE: (u64, u64, u64) = (2, 14, 2);
/// Minimum git-lfs version that supports auth-header injection for LFS transfers.
pub const MIN_LFS_AUTH_HEADER: (u64, u64, u64) = (2, 1, 0);

impl GitCapabilities {
    pub fn supports_cmdline_auth_header(&self) -> bool {
        meets(&self.version, MIN_CMDLINE_AUTH_HEADER)
    }

    pub fn supports_tls_backend_override(&self) -> bool {
        meets(&self.version, MIN_TLS_BACKEND_OVERRIDE)
    }

    pub fn lfs_supports_auth_header(&self) -> bool {
        meets(&self.lfs_version, MIN_LFS_AUTH_HEADER)
    }

    /// Returns `Ok(true)`/`Ok(false)` when `strict` is `false`; returns
    /// [`GitBinaryError::RequirementNotMet`] when `strict` is `true` and the probed
    /// version is below `min`.
    pub fn ensure_version(
        &self,
        min: (u64, u64, u64),
        strict: bool,
    ) -> Result<bool, GitBinaryError> {
        let ok = meets(&self.version, min);
        if !ok && strict {
            return Err(GitBinaryError::RequirementNotMet {
                binary: self.cache_key.binary_path.clone(),
                found: self
                    .version
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                required: format!("{}.{}.{}", min.0, min.1, min.2),
            });
        }
        Ok(ok)
    }
}

fn meets(version: &Option<Version>, min: (u64, u64, u64)) -> bool {
    match version {
        Some(v) => (v.major, v.minor, v.patch) >= min,
        None => false,
    }
}

/// Parses the first `X.Y.Z` (or `X.Y`, treated as `X.Y.0`) semantic version found in
/// `git`/`git-lfs` `--version` output, which is typically prefixed with free text like
/// `git version 2.43.0` or `git-lfs/3.4.1 (GitHub; linux amd64; go 1.21.0)`.
pub fn parse_version_output(raw: &str) -> Option<Version> {
    for token in raw.split(|c: char| !c.is_ascii_digit() && c != '.') {
        let mut parts = token.split('.').filter(|p| !p.is_empty());
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        if major == 0 && minor == 0 && patch == 0 {
            continue;
        }
        return Some(Version::new(major, minor, patch));
    }
    None
}

fn capability_cache() -> &'static Mutex<HashMap<CapabilityCacheKey, GitCapabilities>> {
    static CACHE: OnceLock<Mutex<HashMap<CapabilityCacheKey, GitCapabilities>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn cache_key(binary: &Path) -> CapabilityCacheKey {
    let canonical = std_fs::canonicalize(binary).unwrap_or_else(|_| binary.to_path_buf());
    CapabilityCacheKey {
        binary_path: canonical,
    }
}

pub(crate) fn current_fingerprint(key: &CapabilityCacheKey) -> Option<BinaryFingerprint> {
    let canonical = std_fs::canonicalize(&key.binary_path).ok();
    let metadata_path = canonical.as_deref().unwrap_or(key.binary_path.as_path());
    let metadata = std_fs::metadata(metadata_path).ok()?;
    Some(BinaryFingerprint {
        canonical_path: canonical,
        modified: metadata.modified().ok(),
        len: Some(metadata.len()),
    })
}

pub(crate) fn cached(
    key: &CapabilityCacheKey,
    fingerprint: &Option<BinaryFingerprint>,
) -> Option<GitCapabilities> {
    let cache = capability_cache().lock().ok()?;
    let entry = cache.get(key)?;
    if entry.fingerprint.is_some() && fingerprint.is_some() && entry.fingerprint == *fingerprint {
        Some(entry.clone())
    } else {
        None
    }
}

pub(crate) fn store(
    key: CapabilityCacheKey,
    fingerprint: Option<BinaryFingerprint>,
    version: Option<Version>,
    lfs_version: Option<Version>,
) -> GitCapabilities {
    let capabilities = GitCapabilities {
        cache_key: key.clone(),
        fingerprint,
        version,
        lfs_version,
    };
    if capabilities.fingerprint.is_some() {
        if let Ok(mut cache) = capability_cache().lock() {
            cache.insert(key, capabilities.clone());
        }
    }
    capabilities
}

/// Drops every cached capability snapshot. Exposed for tests that swap binaries
/// between assertions without changing paths.
pub fn clear_capability_cache() {
    if let Ok(mut cache) = capability_cache().lock() {
        cache.clear();
    }
}
