//! Default dispatcher/worker wiring for running the agent standalone.
//!
//! The real dispatcher RPC (HTTP long-poll) and the real job worker (the build-step
//! executor) are host-provided external collaborators, out of scope here. This module
//! gives the binary something concrete to drive the run loop with: a newline-delimited
//! JSON transport over stdio, in the same spirit as the teacher crate's stdio-framed
//! JSON-RPC transport to its wrapped binary, just facing the other direction — this
//! process is the one being driven over stdio instead of the one driving a child.

use std::{io, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

use agent_runtime::{DispatcherClient, JobCancel, JobRequest, Message, MessageType, RunLoopError};

/// Idle delay after stdin EOF, so a closed handle doesn't spin the run loop at 100% CPU.
const EOF_IDLE_DELAY: Duration = Duration::from_millis(50);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    message_id: String,
    message_type: String,
    body: serde_json::Value,
}

/// Reads messages as newline-delimited JSON from stdin, acks over stdout.
pub struct StdioDispatcherClient {
    reader: Mutex<BufReader<Stdin>>,
    writer: Mutex<Stdout>,
}

impl StdioDispatcherClient {
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(BufReader::new(tokio::io::stdin())),
            writer: Mutex::new(tokio::io::stdout()),
        }
    }

    async fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }
}

impl Default for StdioDispatcherClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatcherClient for StdioDispatcherClient {
    async fn create_session(&self, _cancel: &CancellationToken) -> Result<bool, RunLoopError> {
        self.write_line(r#"{"event":"session-created"}"#)
            .await
            .map_err(|source| RunLoopError::Transport(source.to_string()))?;
        Ok(true)
    }

    async fn get_next_message(&self, _cancel: &CancellationToken) -> Result<Option<Message>, RunLoopError> {
        let mut line = String::new();
        let bytes_read = {
            let mut reader = self.reader.lock().await;
            reader
                .read_line(&mut line)
                .await
                .map_err(|source| RunLoopError::Transport(source.to_string()))?
        };

        if bytes_read == 0 {
            // EOF: nothing more will ever arrive on this handle. Treat it as an empty
            // long-poll result rather than an error, but idle first so the loop doesn't
            // spin calling us back immediately.
            tokio::time::sleep(EOF_IDLE_DELAY).await;
            return Ok(None);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let wire: WireMessage = serde_json::from_str(trimmed)
            .map_err(|source| RunLoopError::Transport(format!("malformed message envelope: {source}")))?;
        let body = serde_json::to_vec(&wire.body)
            .map_err(|source| RunLoopError::Transport(format!("malformed message body: {source}")))?;

        Ok(Some(Message {
            message_id: wire.message_id,
            message_type: MessageType::parse(&wire.message_type),
            body,
        }))
    }

    async fn delete_message(
        &self,
        _pool_id: &str,
        message_id: &str,
        _session_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), RunLoopError> {
        self.write_line(&format!(r#"{{"ack":"{message_id}"}}"#))
            .await
            .map_err(|source| RunLoopError::Transport(source.to_string()))
    }

    async fn delete_session(&self) -> Result<(), RunLoopError> {
        self.write_line(r#"{"event":"session-closed"}"#)
            .await
            .map_err(|source| RunLoopError::Transport(source.to_string()))
    }
}

/// Logs job lifecycle events instead of executing build steps. A real deployment
/// replaces this with the worker dispatcher that actually owns job execution.
#[derive(Default)]
pub struct LoggingWorkerDispatcher;

#[async_trait]
impl agent_runtime::WorkerDispatcher for LoggingWorkerDispatcher {
    async fn run(&self, job: JobRequest) {
        tracing::info!(job_id = %job.job_id, plan_id = ?job.plan_id, "job requested; no build-step worker wired into this binary");
    }

    async fn cancel(&self, job: JobCancel) -> bool {
        tracing::info!(job_id = %job.job_id, auto_update_in_progress = job.auto_update_in_progress, "job cancel requested");
        true
    }

    async fn shutdown(&self) {
        tracing::info!("worker dispatcher shutting down");
    }
}
