use std::path::PathBuf;

use git_binary::GitBinaryError;

/// Errors surfaced by the source-acquisition orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("invalid repository descriptor: {reason}")]
    BadInput { reason: String },

    #[error("underlying git invocation failed: {0}")]
    Git(#[from] GitBinaryError),

    #[error("failed to inspect working copy at {path}: {source}")]
    WorkingCopyIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config key `{key}` could not be reconciled: {reason}")]
    ConfigReconcile { key: String, reason: String },

    #[error("provider `{provider}` does not support this operation: {reason}")]
    UnsupportedByProvider { provider: String, reason: String },

    #[error("askpass helper could not be provisioned: {reason}")]
    Askpass { reason: String },

    #[error("acquisition for `{alias}` was cancelled")]
    Cancelled { alias: String },

    #[error("url `{url}` could not be parsed: {source}")]
    UrlParse {
        url: String,
        #[source]
        source: url::ParseError,
    },
}
