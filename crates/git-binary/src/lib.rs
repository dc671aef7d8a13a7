#![forbid(unsafe_code)]
//! Async adapter over an external `git` binary (and its `git-lfs` extension) for a CI
//! build agent's source-acquisition core.
//!
//! This crate owns exactly the concerns in the external-binary adapter: locating and
//! version-probing the binary, invoking its subcommands with streamed, secret-masked
//! stdout/stderr, and surfacing a capability snapshot so callers can gate behavior on
//! the minimum versions that support cmdline auth headers, TLS backend overrides, and
//! LFS auth headers. It does not know about repositories, providers, or credentials —
//! see the `source-acquire` crate for the orchestrator built on top of this adapter.

mod binary;
mod capabilities;
mod error;
mod log_sink;
mod ops;
mod process;

pub use binary::{select_binary, select_lfs_binary};
pub use capabilities::{
    clear_capability_cache, parse_version_output, BinaryFingerprint, CapabilityCacheKey,
    CapabilityCachePolicy, GitCapabilities, MIN_CMDLINE_AUTH_HEADER, MIN_LFS_AUTH_HEADER,
    MIN_TLS_BACKEND_OVERRIDE,
};
pub use error::GitBinaryError;
pub use log_sink::{LineRedactor, LogSink, NoopRedactor, TracingLogSink};
pub use ops::GitBinary;
pub use process::CommandOutput;
