//! The message envelope exchanged with the dispatcher, per §6's run-loop boundary.

use serde::Deserialize;

use crate::error::RunLoopError;

/// `messageType` is matched case-insensitively; anything else dispatches to
/// [`MessageType::Unknown`] and is acknowledged without further action.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    Refresh,
    JobRequest,
    JobCancel,
    Unknown,
}

impl MessageType {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "refresh" => Self::Refresh,
            "jobrequest" => Self::JobRequest,
            "jobcancel" => Self::JobCancel,
            _ => Self::Unknown,
        }
    }
}

/// One message as delivered by the dispatcher's long-poll transport. `body` is an
/// opaque payload; its shape depends on `message_type` and is decoded lazily.
#[derive(Clone, Debug)]
pub struct Message {
    pub message_id: String,
    pub message_type: MessageType,
    pub body: Vec<u8>,
}

impl Message {
    pub fn decode_job_request(&self) -> Result<JobRequest, RunLoopError> {
        serde_json::from_slice(&self.body).map_err(|source| RunLoopError::MalformedBody {
            message_id: self.message_id.clone(),
            expected: "JobRequest",
            reason: source.to_string(),
        })
    }

    pub fn decode_job_cancel(&self) -> Result<JobCancel, RunLoopError> {
        serde_json::from_slice(&self.body).map_err(|source| RunLoopError::MalformedBody {
            message_id: self.message_id.clone(),
            expected: "JobCancel",
            reason: source.to_string(),
        })
    }
}

/// A request to run a job, handed to the worker dispatcher's `Run`.
#[derive(Clone, Debug, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
    #[serde(default)]
    pub plan_id: Option<String>,
}

/// A request to cancel an in-flight job.
#[derive(Clone, Debug, Deserialize)]
pub struct JobCancel {
    pub job_id: String,
    #[serde(default)]
    pub auto_update_in_progress: bool,
}
