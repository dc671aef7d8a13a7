use std::{path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

/// Errors that may occur while invoking the external `git` (or `git-lfs`) binary.
#[derive(Debug, Error)]
pub enum GitBinaryError {
    #[error("git binary `{binary}` could not be spawned: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for git process: {source}")]
    Wait {
        #[source]
        source: std::io::Error,
    },
    #[error("git exceeded timeout of {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("`{command}` exited with {status:?}")]
    NonZeroExit {
        command: String,
        status: ExitStatus,
    },
    #[error("git output was not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("operation was cancelled")]
    Cancelled,
    #[error(
        "git binary at `{binary}` reports version {found} but this operation requires at least {required}"
    )]
    RequirementNotMet {
        binary: PathBuf,
        found: String,
        required: String,
    },
    #[error("failed to capture git output: {0}")]
    CaptureIo(#[from] std::io::Error),
    #[error("failed to join git output task: {0}")]
    Join(#[from] tokio::task::JoinError),
}
