#![forbid(unsafe_code)]
//! The agent run loop: opens a session with a remote dispatcher, long-polls for
//! messages, and routes them to a worker dispatcher that owns job lifecycle. Built
//! the way `git-binary` is: typed seams (traits) for everything the host provides,
//! and `thiserror` for everything that can go wrong on this side of those seams.

mod dispatcher;
mod error;
mod message;
mod runloop;
mod session;

pub use dispatcher::{DispatcherClient, WorkerDispatcher};
pub use error::RunLoopError;
pub use message::{JobCancel, JobRequest, Message, MessageType};
pub use runloop::RunLoop;
pub use session::{RunPhase, Session};
