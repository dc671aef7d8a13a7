use std::{path::Path, process::ExitStatus, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::GitBinaryError,
    log_sink::{LineRedactor, LogSink},
};

/// Captured result of a single external-binary invocation.
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Spawns `command`, retrying on a transiently busy executable (ETXTBSY), matching the
/// backoff a build agent sees when the `git` binary is mid-replacement by a package
/// manager on the same machine.
pub(crate) fn spawn_with_retry(command: &mut Command, binary: &Path) -> Result<Child, GitBinaryError> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    std::thread::sleep(backoff);
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(GitBinaryError::Spawn {
                    binary: binary.to_path_buf(),
                    source,
                });
            }
        }
    }
    unreachable!("spawn_with_retry should return before exhausting retries")
}

/// Runs `command` to completion, streaming each stdout/stderr line through `redactor`
/// before handing it to `sink`, while honoring cooperative cancellation: on cancel the
/// child is sent a terminate signal and its exit is awaited before returning
/// [`GitBinaryError::Cancelled`].
///
/// The raw (unredacted) bytes are still returned in [`CommandOutput`] so callers can
/// parse config values the adapter itself needs (e.g. `config --get remote.origin.url`)
/// without that value ever having touched a log sink unmasked.
pub(crate) async fn run(
    mut command: Command,
    binary: &Path,
    sink: &dyn LogSink,
    redactor: &dyn LineRedactor,
    cancel: &CancellationToken,
) -> Result<CommandOutput, GitBinaryError> {
    command.stdin(std::process::Stdio::null());
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());

    let mut child = spawn_with_retry(&mut command, binary)?;
    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let stdout_task = tokio::spawn(collect_lines(stdout));
    let stderr_task = tokio::spawn(collect_lines(stderr));

    tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            Err(GitBinaryError::Cancelled)
        }
        status = child.wait() => {
            let status = status.map_err(|source| GitBinaryError::Wait { source })?;
            let stdout_lines = stdout_task.await??;
            let stderr_lines = stderr_task.await??;

            let mut stdout_buf = Vec::new();
            for line in &stdout_lines {
                sink.output(&redactor.redact(line));
                stdout_buf.extend_from_slice(line.as_bytes());
                stdout_buf.push(b'\n');
            }
            let mut stderr_buf = Vec::new();
            for line in &stderr_lines {
                sink.error(&redactor.redact(line));
                stderr_buf.extend_from_slice(line.as_bytes());
                stderr_buf.push(b'\n');
            }

            Ok(CommandOutput {
                status,
                stdout: stdout_buf,
                stderr: stderr_buf,
            })
        }
    }
}

async fn collect_lines<R>(reader: R) -> Result<Vec<String>, GitBinaryError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = Vec::new();
    let mut reader = BufReader::new(reader).lines();
    while let Some(line) = reader.next_line().await? {
        lines.push(line);
    }
    Ok(lines)
}
