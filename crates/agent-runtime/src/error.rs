use thiserror::Error;

/// Errors surfaced by the agent run loop.
#[derive(Debug, Error)]
pub enum RunLoopError {
    #[error("dispatcher refused to create a session")]
    SessionCreationFailed,

    #[error("transport error fetching the next message: {0}")]
    Transport(String),

    #[error("message `{message_id}` could not be decoded as {expected}: {reason}")]
    MalformedBody {
        message_id: String,
        expected: &'static str,
        reason: String,
    },

    #[error("message `{message_id}` could not be deleted: {reason}")]
    DeleteMessage { message_id: String, reason: String },
}
