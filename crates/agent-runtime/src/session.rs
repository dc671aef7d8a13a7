//! Session state held by the run loop: `sessionId`, `poolId`, and the phase used to
//! decide how an interrupt signal is handled (§4.5, §5).

/// Which phase of the agent process an interrupt signal arrived in. Configuration
/// and the run loop react differently: the agent binary owns the signal handler and
/// consults this to decide whether to tear down immediately or request a cooperative
/// cancellation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunPhase {
    /// Reading configuration / negotiating with the dispatcher before the loop
    /// starts. An interrupt here tears the process down immediately.
    Configuring,
    /// Inside the message loop. An interrupt here triggers the shared cancel token
    /// and lets the loop finish its current iteration cleanly.
    Running,
}

impl RunPhase {
    /// The process exit code an interrupt during this phase should produce, per §6:
    /// 0 on a clean run-loop exit, 1 when configuration never completed.
    pub fn interrupt_exit_code(self) -> i32 {
        match self {
            RunPhase::Configuring => 1,
            RunPhase::Running => 0,
        }
    }
}

/// Identity of one open dispatcher session.
#[derive(Clone, Debug)]
pub struct Session {
    pub session_id: String,
    pub pool_id: String,
}

impl Session {
    pub fn new(session_id: impl Into<String>, pool_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), pool_id: pool_id.into() }
    }
}
