//! Build-agent process entrypoint: probes the external `git` binary, then drives the
//! dispatcher run loop. Command-line parsing, configuration persistence, and the HTTP
//! transport/job worker behind the run loop are host-provided collaborators (§1) —
//! this binary reads its configuration from the environment and assembles the pieces
//! this workspace does own: `git-binary`, `source-acquire`, and `agent-runtime`.

mod dispatch;
mod error;

use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
};

use git_binary::{CapabilityCachePolicy, GitBinary, NoopRedactor, TracingLogSink};
use source_acquire::AgentEnvironment;
use tokio_util::sync::CancellationToken;

use agent_runtime::{RunLoop, RunPhase, Session};
use dispatch::{LoggingWorkerDispatcher, StdioDispatcherClient};
use error::AgentError;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Spawns the interrupt handler described in §4.5: during configuration an interrupt
/// is fatal, during the run loop it triggers cooperative cancellation.
fn spawn_interrupt_handler(phase: Arc<Mutex<RunPhase>>, cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        let current_phase = *phase.lock().unwrap();
        match current_phase {
            RunPhase::Configuring => {
                tracing::warn!("interrupted during configuration; exiting immediately");
                std::process::exit(RunPhase::Configuring.interrupt_exit_code());
            }
            RunPhase::Running => {
                tracing::info!("interrupted during run loop; requesting cooperative shutdown");
                cancel.cancel();
            }
        }
    });
}

async fn inner() -> Result<i32, AgentError> {
    let environment = AgentEnvironment::from_process_env();

    let bundled_git = std::env::var_os("AGENT_EXTERNALS_GIT").map(PathBuf::from);
    let bundled_git_lfs = std::env::var_os("AGENT_EXTERNALS_GIT_LFS").map(PathBuf::from);
    let git_path = git_binary::select_binary(bundled_git.as_ref(), environment.prefer_git_from_path);
    let lfs_path = git_binary::select_lfs_binary(bundled_git_lfs.as_ref(), environment.prefer_git_from_path);
    let git = GitBinary::new(git_path, lfs_path);

    let phase = Arc::new(Mutex::new(RunPhase::Configuring));
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(phase.clone(), cancel.clone());

    let capabilities = git
        .probe_capabilities(CapabilityCachePolicy::PreferCache, &TracingLogSink, &NoopRedactor, &cancel)
        .await?;
    tracing::info!(
        cmdline_auth_header = capabilities.supports_cmdline_auth_header(),
        tls_backend_override = capabilities.supports_tls_backend_override(),
        lfs_auth_header = capabilities.lfs_supports_auth_header(),
        "git capabilities probed"
    );

    *phase.lock().unwrap() = RunPhase::Running;

    let pool_id = std::env::var("AGENT_POOL_ID").unwrap_or_else(|_| "default".to_string());
    let session_id = std::env::var("AGENT_SESSION_ID").unwrap_or_else(|_| "local".to_string());
    let session = Session::new(session_id, pool_id);

    let run_loop = RunLoop::new(StdioDispatcherClient::new(), LoggingWorkerDispatcher, session);
    run_loop.run(&cancel).await?;

    Ok(0)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match inner().await {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            tracing::error!(error = %err, "agent exited with a fatal error");
            ExitCode::from(1)
        }
    }
}
