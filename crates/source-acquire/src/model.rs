use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use url::Url;

use crate::error::AcquireError;

/// Which provider variant a repository belongs to, driving auth-header support,
/// minimum binary version requirements, and header encoding (see [`crate::provider`]).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProviderType {
    External,
    GitHub,
    GitHubEnterprise,
    Bitbucket,
    CentralHosted,
    CentralOnPrem,
}

/// The requested state for a single repository within a job.
#[derive(Clone, Debug)]
pub struct RepositoryDescriptor {
    /// Unique (within a job) name used for logging and to key concurrent acquisitions.
    pub alias: String,
    pub repo_type: ProviderType,
    pub url: Url,
    /// Symbolic ref (`refs/heads/main`) or full ref path requested for checkout.
    pub branch: String,
    /// 40-char hex commit SHA; when present, overrides `branch` for checkout.
    pub commit: Option<String>,
    pub target_path: PathBuf,
    pub clean: bool,
    pub submodules: bool,
    pub nested_submodules: bool,
    pub accept_untrusted_certs: bool,
    /// `0` means unshallow (full history).
    pub fetch_depth: u32,
    pub lfs: bool,
    pub expose_credentials: bool,
    pub on_prem_hosted: bool,
}

impl RepositoryDescriptor {
    /// Validates the invariants from the data model: the URL must be absolute and a
    /// non-empty `commit`, when present, must be exactly 40 hex characters.
    pub fn validate(&self) -> Result<(), AcquireError> {
        if self.url.cannot_be_a_base() {
            return Err(AcquireError::BadInput {
                reason: format!("repository url `{}` is not absolute", self.url),
            });
        }
        if let Some(commit) = &self.commit {
            let is_40_hex =
                commit.len() == 40 && commit.chars().all(|c| c.is_ascii_hexdigit());
            if !is_40_hex {
                return Err(AcquireError::BadInput {
                    reason: format!("commit `{commit}` is not a 40-character hex sha"),
                });
            }
        }
        if !self.target_path.is_absolute() {
            return Err(AcquireError::BadInput {
                reason: format!("target path `{}` is not absolute", self.target_path.display()),
            });
        }
        Ok(())
    }

    /// `true` when `commit` should drive checkout instead of `branch`.
    pub fn checkout_by_commit(&self) -> bool {
        self.commit.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// `true` when `branch` is a server-synthesized pull-request ref.
    pub fn is_pull_request_ref(&self) -> bool {
        self.branch.starts_with("refs/pull/") || self.branch.starts_with("refs/remotes/pull/")
    }
}

/// Authentication material selected for one acquisition.
#[derive(Clone, Debug)]
pub enum Credential {
    /// Caller manages credentials itself (`system.selfmanagegitcreds`); the
    /// orchestrator performs every non-credential step and skips header/URL-embedding/
    /// config-cleanup paths entirely.
    None,
    /// Opaque bearer token, rendered `Authorization: bearer <token>`.
    Bearer(String),
    /// Username+password, rendered `Authorization: basic base64(u:p)`.
    Basic { username: String, password: String },
    /// OAuth access token carried in the password field; username is always the
    /// literal string `OAuth`, encoded the same way as [`Credential::Basic`].
    OAuth { token: String },
}

impl Credential {
    /// Returns the `(username, password)` pair used for Basic/OAuth-style encoding,
    /// or `None` for variants that don't encode as userinfo.
    pub fn userinfo(&self) -> Option<(&str, &str)> {
        match self {
            Credential::Basic { username, password } => Some((username, password)),
            Credential::OAuth { token } => Some(("OAuth", token)),
            Credential::Bearer(_) | Credential::None => None,
        }
    }
}

/// Mutual-TLS and CA material, relevant only when a repository shares scheme+host
/// with the agent's configured control-plane endpoint.
#[derive(Clone, Debug, Default)]
pub struct AgentCertificateBundle {
    pub ca_file: Option<PathBuf>,
    pub client_cert_file: Option<PathBuf>,
    pub client_key_file: Option<PathBuf>,
    pub client_key_password: Option<String>,
    pub skip_server_validation: bool,
}

impl AgentCertificateBundle {
    pub fn has_client_cert(&self) -> bool {
        self.client_cert_file.is_some() && self.client_key_file.is_some()
    }
}

/// Proxy configuration applied to every invocation unless the target URL is bypassed.
#[derive(Clone, Debug, Default)]
pub struct ProxySettings {
    pub address: String,
    pub username: String,
    pub password: String,
    pub bypass_list: Vec<String>,
}

impl ProxySettings {
    pub fn is_configured(&self) -> bool {
        !self.address.trim().is_empty()
    }

    /// Pure predicate: `true` when `url`'s host matches an entry in `bypass_list`
    /// (exact host match or a `*.suffix` wildcard entry).
    pub fn is_bypassed(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        self.bypass_list.iter().any(|entry| {
            let entry = entry.trim();
            if let Some(suffix) = entry.strip_prefix("*.") {
                host == suffix || host.ends_with(&format!(".{suffix}"))
            } else {
                host.eq_ignore_ascii_case(entry)
            }
        })
    }
}

/// The agent's configured control-plane endpoint, used only to decide whether
/// [`AgentCertificateBundle`] applies to a given repository host.
#[derive(Clone, Debug)]
pub struct SystemConnection {
    pub url: Url,
}

impl SystemConnection {
    /// `true` when `url` shares scheme and host with this connection's endpoint.
    pub fn shares_authority_with(&self, url: &Url) -> bool {
        self.url.scheme() == url.scheme() && self.url.host_str() == url.host_str()
    }
}

/// Derived (not persisted) state of a working tree relative to a requested URL.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkingCopyState {
    /// Directory missing or empty.
    Absent,
    /// Directory exists but recorded origin does not match the requested URL.
    Foreign,
    /// Recorded origin matches; clean state assumed.
    Local,
    /// Recorded origin matches but an index lock file is present.
    Locked,
}

/// Tracks every config key this orchestrator writes during one acquisition so
/// cleanup can undo exactly what was added, preferring `unset` and falling back to
/// a textual edit when `unset` fails (see `source-acquire::config_state`).
#[derive(Clone, Debug, Default)]
pub struct ConfigModification {
    written: BTreeMap<String, String>,
}

impl ConfigModification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.written.insert(key.into(), value.into());
    }

    pub fn forget(&mut self, key: &str) {
        self.written.remove(key);
    }

    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.written.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.written.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }
}

/// Append-only set of secret strings that must never appear literally in a log line.
/// Lives for the lifetime of the containing job, shared across every acquisition the
/// job runs so a credential used for one repository is still masked if it leaks into
/// another repository's logs (e.g. through a shared submodule URL).
#[derive(Clone, Debug, Default)]
pub struct SecretRegistry {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.is_empty() {
            return;
        }
        self.inner.lock().unwrap().insert(secret);
    }

    pub fn contains(&self, line: &str) -> bool {
        self.inner.lock().unwrap().iter().any(|s| line.contains(s.as_str()))
    }
}

impl git_binary::LineRedactor for SecretRegistry {
    fn redact(&self, line: &str) -> String {
        let secrets = self.inner.lock().unwrap();
        let mut redacted = line.to_string();
        for secret in secrets.iter() {
            if secret.is_empty() {
                continue;
            }
            redacted = redacted.replace(secret.as_str(), "***");
        }
        redacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_bypass_matches_exact_host() {
        let proxy = ProxySettings {
            address: "http://proxy:8080".into(),
            bypass_list: vec!["internal.example.com".into()],
            ..Default::default()
        };
        let url = Url::parse("https://internal.example.com/repo.git").unwrap();
        assert!(proxy.is_bypassed(&url));
    }

    #[test]
    fn proxy_bypass_matches_wildcard_suffix() {
        let proxy = ProxySettings {
            address: "http://proxy:8080".into(),
            bypass_list: vec!["*.example.com".into()],
            ..Default::default()
        };
        let url = Url::parse("https://git.example.com/repo.git").unwrap();
        assert!(proxy.is_bypassed(&url));
        let other = Url::parse("https://git.other.com/repo.git").unwrap();
        assert!(!proxy.is_bypassed(&other));
    }

    #[test]
    fn secret_registry_masks_every_occurrence() {
        let registry = SecretRegistry::new();
        registry.add("tok3n");
        let redacted = git_binary::LineRedactor::redact(&registry, "Authorization: basic tok3n and tok3n again");
        assert!(!redacted.contains("tok3n"));
    }

    #[test]
    fn commit_must_be_exactly_40_hex_chars() {
        let mut descriptor = sample_descriptor();
        descriptor.commit = Some("deadbeef".into());
        assert!(descriptor.validate().is_err());
        descriptor.commit = Some("a".repeat(40));
        assert!(descriptor.validate().is_ok());
    }

    fn sample_descriptor() -> RepositoryDescriptor {
        RepositoryDescriptor {
            alias: "w".into(),
            repo_type: ProviderType::GitHub,
            url: Url::parse("https://github.com/acme/w.git").unwrap(),
            branch: "refs/heads/main".into(),
            commit: None,
            target_path: PathBuf::from("/tmp/w"),
            clean: true,
            submodules: false,
            nested_submodules: false,
            accept_untrusted_certs: false,
            fetch_depth: 0,
            lfs: false,
            expose_credentials: false,
            on_prem_hosted: false,
        }
    }
}
