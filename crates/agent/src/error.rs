use thiserror::Error;

/// Top-level failure modes for the agent process. Both variants map to exit code 1
/// per §6; `main` only distinguishes them for the log line it prints on the way out.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("git binary could not be probed at startup: {0}")]
    GitCapabilities(#[from] git_binary::GitBinaryError),

    #[error("run loop exited with an error: {0}")]
    RunLoop(#[from] agent_runtime::RunLoopError),
}
