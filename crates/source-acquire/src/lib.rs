#![forbid(unsafe_code)]
//! Provider-aware source-acquisition orchestrator for a CI build agent.
//!
//! Built on top of `git-binary`: this crate owns the acquisition state machine,
//! credential/URL handling, provider policy, and config-state reconciliation. It
//! knows nothing about job dispatch or the agent run loop — see `agent-runtime`.

mod askpass;
mod config_state;
mod env;
mod error;
mod model;
mod orchestrator;
mod provider;
mod url_creds;

pub use env::AgentEnvironment;
pub use error::AcquireError;
pub use model::{
    AgentCertificateBundle, ConfigModification, Credential, ProviderType, ProxySettings,
    RepositoryDescriptor, SecretRegistry, SystemConnection, WorkingCopyState,
};
pub use orchestrator::{acquire, AcquireArgs};
pub use provider::{render_auth_header, AuthHeaderPolicy};
pub use url_creds::{credential_embed, credential_strip, derive_lfs_url, to_remote_ref};
