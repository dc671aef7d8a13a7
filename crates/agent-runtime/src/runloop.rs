//! The agent run loop: open a session, long-poll for messages, route them to the
//! worker dispatcher, and guarantee ack-or-skip deletion semantics (§4.5).

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{
    dispatcher::{DispatcherClient, WorkerDispatcher},
    error::RunLoopError,
    message::{Message, MessageType},
    session::Session,
};

const MESSAGE_DELETE_DEADLINE: Duration = Duration::from_secs(30);
const RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(2);
const RETRY_MAX_BACKOFF: Duration = Duration::from_millis(50);
const RETRY_MAX_ATTEMPTS: u32 = 5;

/// Drives one dispatcher session to completion. Generic over the dispatcher RPC
/// client and worker dispatcher so tests can supply fakes without a trait object.
pub struct RunLoop<D, W> {
    dispatcher: D,
    worker: W,
    session: Session,
}

impl<D, W> RunLoop<D, W>
where
    D: DispatcherClient,
    W: WorkerDispatcher,
{
    pub fn new(dispatcher: D, worker: W, session: Session) -> Self {
        Self { dispatcher, worker, session }
    }

    /// Opens the session and loops until `cancel` fires, then shuts the worker
    /// dispatcher down and deletes the session (best-effort). Returns
    /// [`RunLoopError::SessionCreationFailed`] immediately if the dispatcher refuses
    /// the session — the caller (the agent binary) maps this to exit code 1.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), RunLoopError> {
        if !self.dispatcher.create_session(cancel).await? {
            return Err(RunLoopError::SessionCreationFailed);
        }

        while !cancel.is_cancelled() {
            let message = match self.next_message_with_retry(cancel).await {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "retry budget exhausted fetching next message; will try again");
                    continue;
                }
            };

            let skip_deletion = self.dispatch(&message).await;
            if !skip_deletion {
                self.delete_message_with_deadline(&message).await;
            }
        }

        self.worker.shutdown().await;
        if let Err(err) = self.dispatcher.delete_session().await {
            tracing::warn!(error = %err, "failed to delete session during shutdown");
        }
        Ok(())
    }

    /// Routes one message to the worker dispatcher. Returns `true` when the message
    /// must *not* be deleted (the `JobCancel` + auto-update-in-progress + not-accepted
    /// case from §4.5, so it redelivers after the update completes).
    async fn dispatch(&self, message: &Message) -> bool {
        match message.message_type {
            MessageType::Refresh => false,
            MessageType::JobRequest => match message.decode_job_request() {
                Ok(job) => {
                    self.worker.run(job).await;
                    false
                }
                Err(err) => {
                    tracing::error!(message_id = %message.message_id, error = %err, "dropping malformed JobRequest");
                    false
                }
            },
            MessageType::JobCancel => match message.decode_job_cancel() {
                Ok(job_cancel) => {
                    let auto_update_in_progress = job_cancel.auto_update_in_progress;
                    let accepted = self.worker.cancel(job_cancel).await;
                    auto_update_in_progress && !accepted
                }
                Err(err) => {
                    tracing::error!(message_id = %message.message_id, error = %err, "dropping malformed JobCancel");
                    false
                }
            },
            MessageType::Unknown => false,
        }
    }

    /// Bounded exponential backoff around `getNextMessage`, mirroring the external
    /// adapter's busy-executable retry: `2ms → 50ms`, capped at five attempts. The
    /// underlying transport already retries its own transient errors; this layer
    /// absorbs whatever still surfaces above it.
    async fn next_message_with_retry(&self, cancel: &CancellationToken) -> Result<Option<Message>, RunLoopError> {
        let mut backoff = RETRY_INITIAL_BACKOFF;
        let mut last_error = None;
        for attempt in 0..RETRY_MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match self.dispatcher.get_next_message(cancel).await {
                Ok(message) => return Ok(message),
                Err(err) => {
                    last_error = Some(err);
                    if attempt + 1 < RETRY_MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff = std::cmp::min(backoff * 2, RETRY_MAX_BACKOFF);
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| RunLoopError::Transport("retry budget exhausted".to_string())))
    }

    /// Deletes `message` under its own 30-second deadline, independent of the loop's
    /// cancel token; deletion errors (including timeout) are logged, never surfaced.
    async fn delete_message_with_deadline(&self, message: &Message) {
        let deadline_cancel = CancellationToken::new();
        let outcome = tokio::time::timeout(
            MESSAGE_DELETE_DEADLINE,
            self.dispatcher.delete_message(
                &self.session.pool_id,
                &message.message_id,
                &self.session.session_id,
                &deadline_cancel,
            ),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(message_id = %message.message_id, error = %err, "failed to delete message");
            }
            Err(_) => {
                tracing::warn!(message_id = %message.message_id, "message deletion timed out after 30s");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::message::{JobCancel, JobRequest};

    #[derive(Default)]
    struct Recorder {
        runs: Mutex<Vec<String>>,
        cancels: Mutex<Vec<String>>,
        shutdown_called: Mutex<bool>,
    }

    struct FakeWorker {
        recorder: Arc<Recorder>,
        accept_cancel: bool,
    }

    #[async_trait]
    impl WorkerDispatcher for FakeWorker {
        async fn run(&self, job: JobRequest) {
            self.recorder.runs.lock().unwrap().push(job.job_id);
        }

        async fn cancel(&self, job: JobCancel) -> bool {
            self.recorder.cancels.lock().unwrap().push(job.job_id);
            self.accept_cancel
        }

        async fn shutdown(&self) {
            *self.recorder.shutdown_called.lock().unwrap() = true;
        }
    }

    struct ScriptedDispatcher {
        messages: Mutex<Vec<Message>>,
        deleted: Mutex<Vec<String>>,
        session_deleted: Mutex<bool>,
    }

    #[async_trait]
    impl DispatcherClient for ScriptedDispatcher {
        async fn create_session(&self, _cancel: &CancellationToken) -> Result<bool, RunLoopError> {
            Ok(true)
        }

        async fn get_next_message(&self, _cancel: &CancellationToken) -> Result<Option<Message>, RunLoopError> {
            Ok(self.messages.lock().unwrap().pop())
        }

        async fn delete_message(
            &self,
            _pool_id: &str,
            message_id: &str,
            _session_id: &str,
            _cancel: &CancellationToken,
        ) -> Result<(), RunLoopError> {
            self.deleted.lock().unwrap().push(message_id.to_string());
            Ok(())
        }

        async fn delete_session(&self) -> Result<(), RunLoopError> {
            *self.session_deleted.lock().unwrap() = true;
            Ok(())
        }
    }

    fn job_request_message(id: &str, job_id: &str) -> Message {
        Message {
            message_id: id.to_string(),
            message_type: MessageType::JobRequest,
            body: serde_json::to_vec(&serde_json::json!({ "job_id": job_id })).unwrap(),
        }
    }

    fn job_cancel_message(id: &str, job_id: &str, auto_update_in_progress: bool) -> Message {
        Message {
            message_id: id.to_string(),
            message_type: MessageType::JobCancel,
            body: serde_json::to_vec(&serde_json::json!({
                "job_id": job_id,
                "auto_update_in_progress": auto_update_in_progress,
            }))
            .unwrap(),
        }
    }

    #[tokio::test]
    async fn job_request_then_job_cancel_both_delete_and_session_tears_down() {
        let recorder = Arc::new(Recorder::default());
        let worker = FakeWorker { recorder: recorder.clone(), accept_cancel: true };

        // Messages are popped off the back, so push in reverse delivery order.
        let dispatcher = ScriptedDispatcher {
            messages: Mutex::new(vec![job_cancel_message("m2", "a", false), job_request_message("m1", "a")]),
            deleted: Mutex::new(Vec::new()),
            session_deleted: Mutex::new(false),
        };

        let cancel = CancellationToken::new();
        let run_loop = RunLoop::new(dispatcher, worker, Session::new("s1", "p1"));

        // Stop the loop once both scripted messages have been deleted.
        let watcher = {
            let cancel = cancel.clone();
            async {
                loop {
                    if run_loop.dispatcher.deleted.lock().unwrap().len() >= 2 {
                        cancel.cancel();
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        };

        let (run_result, ()) = tokio::join!(run_loop.run(&cancel), watcher);
        run_result.unwrap();

        assert_eq!(*run_loop.worker.recorder.runs.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(*run_loop.worker.recorder.cancels.lock().unwrap(), vec!["a".to_string()]);
        assert!(*run_loop.worker.recorder.shutdown_called.lock().unwrap());
        assert_eq!(*run_loop.dispatcher.deleted.lock().unwrap(), vec!["m1".to_string(), "m2".to_string()]);
        assert!(*run_loop.dispatcher.session_deleted.lock().unwrap());
    }

    #[tokio::test]
    async fn job_cancel_with_auto_update_in_progress_and_rejection_skips_deletion() {
        let recorder = Arc::new(Recorder::default());
        let worker = FakeWorker { recorder, accept_cancel: false };
        let dispatcher = ScriptedDispatcher {
            messages: Mutex::new(vec![job_cancel_message("m1", "a", true)]),
            deleted: Mutex::new(Vec::new()),
            session_deleted: Mutex::new(false),
        };
        let cancel = CancellationToken::new();
        let run_loop = RunLoop::new(dispatcher, worker, Session::new("s1", "p1"));

        let message = run_loop.next_message_with_retry(&cancel).await.unwrap().unwrap();
        let skip_deletion = run_loop.dispatch(&message).await;

        assert!(skip_deletion, "message must not be deleted when auto-update is in progress and the cancel was rejected");
    }
}
