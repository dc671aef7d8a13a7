//! The two host-provided seams the run loop drives: the dispatcher RPC client (a
//! remote session over HTTP, out of scope here per §1) and the worker dispatcher that
//! owns job lifecycle once a job is handed off.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::RunLoopError,
    message::{JobCancel, JobRequest, Message},
};

/// RPC surface of the remote dispatcher, per §6's run-loop boundary. Implemented by
/// the host's transport layer; the run loop only ever sees this trait.
#[async_trait]
pub trait DispatcherClient: Send + Sync {
    async fn create_session(&self, cancel: &CancellationToken) -> Result<bool, RunLoopError>;

    /// Long-polls for the next message. The transport retries transient errors
    /// internally; a returned `Err` here means the retry budget was exhausted.
    async fn get_next_message(&self, cancel: &CancellationToken) -> Result<Option<Message>, RunLoopError>;

    async fn delete_message(
        &self,
        pool_id: &str,
        message_id: &str,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RunLoopError>;

    async fn delete_session(&self) -> Result<(), RunLoopError>;
}

/// Owns job lifecycle once a job is handed off by the run loop. `Run` is
/// non-blocking: the dispatcher schedules the job and returns immediately.
#[async_trait]
pub trait WorkerDispatcher: Send + Sync {
    async fn run(&self, job: JobRequest);

    /// Returns `true` if the job was accepted for cancellation.
    async fn cancel(&self, job: JobCancel) -> bool;

    /// Awaits every in-flight job before returning.
    async fn shutdown(&self);
}
