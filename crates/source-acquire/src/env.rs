//! Environment-derived configuration, read once at construction, mirroring the
//! teacher crate's `CommandEnvironment`.

use std::path::{Path, PathBuf};

/// The subset of agent configuration the source-acquisition core reads.
#[derive(Clone, Debug)]
pub struct AgentEnvironment {
    /// `agent.tempdirectory` — where askpass helper scripts are written.
    pub temp_directory: PathBuf,
    /// `system.prefergitfrompath` — binary-selection override.
    pub prefer_git_from_path: bool,
    /// `system.selfmanagegitcreds` — top-level mode flag gating every
    /// credential-touching step in *Prepare*/*Finalize*.
    pub self_manage_git_creds: bool,
}

impl AgentEnvironment {
    pub fn new(temp_directory: impl Into<PathBuf>, prefer_git_from_path: bool, self_manage_git_creds: bool) -> Self {
        Self {
            temp_directory: temp_directory.into(),
            prefer_git_from_path,
            self_manage_git_creds,
        }
    }

    pub fn temp_directory(&self) -> &Path {
        &self.temp_directory
    }

    /// Reads from process environment variables, falling back to the system temp
    /// directory when `AGENT_TEMPDIRECTORY` is unset.
    pub fn from_process_env() -> Self {
        let temp_directory = std::env::var_os("AGENT_TEMPDIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let prefer_git_from_path = env_flag("SYSTEM_PREFERGITFROMPATH");
        let self_manage_git_creds = env_flag("SYSTEM_SELFMANAGEGITCREDS");
        Self::new(temp_directory, prefer_git_from_path, self_manage_git_creds)
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| v.eq_ignore_ascii_case("true") || v == "1").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_constructor_roundtrips_fields() {
        let env = AgentEnvironment::new("/tmp/agent", true, false);
        assert_eq!(env.temp_directory(), Path::new("/tmp/agent"));
        assert!(env.prefer_git_from_path);
        assert!(!env.self_manage_git_creds);
    }
}
