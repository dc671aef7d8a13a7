use std::path::PathBuf;

/// Resolves which `git` executable an acquisition should invoke.
///
/// On Windows (the platform whose default TLS stack is not OpenSSL) the agent prefers
/// its own bundled `git.exe`/`git-lfs.exe` so TLS behavior stays predictable across
/// build machines, unless the host configuration requests the `PATH`-resolved binary
/// instead. Every other platform always uses the `PATH`-resolved binary.
pub fn select_binary(bundled: Option<&PathBuf>, prefer_from_path: bool) -> PathBuf {
    if cfg!(windows) && !prefer_from_path {
        if let Some(bundled) = bundled {
            return bundled.clone();
        }
    }
    PathBuf::from("git")
}

/// Companion selector for the `git-lfs` extension binary, following the same rule.
pub fn select_lfs_binary(bundled: Option<&PathBuf>, prefer_from_path: bool) -> PathBuf {
    if cfg!(windows) && !prefer_from_path {
        if let Some(bundled) = bundled {
            return bundled.clone();
        }
    }
    PathBuf::from("git-lfs")
}
