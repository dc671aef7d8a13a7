/// Host-provided sink for everything this crate and its callers want to surface to a
/// build log. Every line reaching a sink has already passed through a [`LineRedactor`],
/// so implementations never need to mask secrets themselves.
pub trait LogSink: Send + Sync {
    fn output(&self, line: &str);
    fn debug(&self, line: &str);
    fn warning(&self, line: &str);
    fn error(&self, line: &str);
    fn progress(&self, percent: u8, message: &str);
    /// Registers a value that must be masked in every subsequent line handed to
    /// this sink's `output`/`debug`/`warning`/`error` methods.
    fn set_secret(&self, value: &str);
    /// Echoes the literal command line about to be invoked, already redacted.
    fn command(&self, line: &str);
}

/// Masks every occurrence of a registered secret before a line reaches a [`LogSink`].
///
/// Implemented by the orchestrator's `SecretRegistry` in `source-acquire`; this crate
/// only needs the ability to ask "does this line contain anything secret", not to own
/// the registry itself.
pub trait LineRedactor: Send + Sync {
    fn redact(&self, line: &str) -> String;
}

/// A [`LineRedactor`] that performs no redaction. Useful for tests and for invocations
/// that are known never to embed secrets (e.g. plain `--version` probes).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRedactor;

impl LineRedactor for NoopRedactor {
    fn redact(&self, line: &str) -> String {
        line.to_string()
    }
}

/// A [`LogSink`] that forwards every call to `tracing`, for use by binaries and tests
/// that don't need a bespoke job-log implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn output(&self, line: &str) {
        tracing::info!(target: "git_binary::output", "{line}");
    }

    fn debug(&self, line: &str) {
        tracing::debug!(target: "git_binary::output", "{line}");
    }

    fn warning(&self, line: &str) {
        tracing::warn!(target: "git_binary::output", "{line}");
    }

    fn error(&self, line: &str) {
        tracing::error!(target: "git_binary::output", "{line}");
    }

    fn progress(&self, percent: u8, message: &str) {
        tracing::info!(target: "git_binary::progress", percent, "{message}");
    }

    fn set_secret(&self, _value: &str) {}

    fn command(&self, line: &str) {
        tracing::debug!(target: "git_binary::command", "{line}");
    }
}
