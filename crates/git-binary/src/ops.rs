use std::path::{Path, PathBuf};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::{
    capabilities::{self, CapabilityCachePolicy, GitCapabilities},
    error::GitBinaryError,
    log_sink::{LineRedactor, LogSink},
    process::{self, CommandOutput},
};

/// Splits a whitespace-joined `-c key=value ...` prefix into argv tokens, honoring
/// double-quoted segments so a value containing a space (an `AUTHORIZATION: basic
/// <token>` header, say) survives as one token instead of being cut in half.
fn split_extra_args(extra: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for ch in extra.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

/// Adapter over an external `git` binary (and its `git-lfs` extension).
///
/// Every operation is a single, serialized child-process invocation: the working
/// directory, typed arguments, an optional whitespace-joined `-c key=value ...`
/// prefix (how per-invocation credentials are injected without persisting them to
/// disk), and a [`CancellationToken`] are threaded through uniformly.
#[derive(Clone, Debug)]
pub struct GitBinary {
    binary: PathBuf,
    lfs_binary: PathBuf,
}

impl GitBinary {
    pub fn new(binary: impl Into<PathBuf>, lfs_binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            lfs_binary: lfs_binary.into(),
        }
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary
    }

    fn command(&self, working_dir: &Path, extra_args: Option<&str>, args: &[&str]) -> Command {
        let mut command = Command::new(&self.binary);
        command.current_dir(working_dir);
        if let Some(extra) = extra_args {
            for token in split_extra_args(extra) {
                command.arg(token);
            }
        }
        command.args(args);
        command
    }

    fn lfs_command(&self, working_dir: &Path, extra_args: Option<&str>, args: &[&str]) -> Command {
        let mut command = Command::new(&self.lfs_binary);
        command.current_dir(working_dir);
        if let Some(extra) = extra_args {
            for token in split_extra_args(extra) {
                command.arg(token);
            }
        }
        command.args(args);
        command
    }

    async fn invoke(
        &self,
        command: Command,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
        description: &str,
    ) -> Result<CommandOutput, GitBinaryError> {
        sink.command(&redactor.redact(description));
        process::run(command, &self.binary, sink, redactor, cancel).await
    }

    /// Probes `git --version` and `git-lfs --version`, consulting the in-process
    /// capability cache per [`CapabilityCachePolicy`].
    pub async fn probe_capabilities(
        &self,
        policy: CapabilityCachePolicy,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<GitCapabilities, GitBinaryError> {
        let key = capabilities::cache_key(&self.binary);
        let fingerprint = capabilities::current_fingerprint(&key);

        if matches!(policy, CapabilityCachePolicy::PreferCache) {
            if let Some(cached) = capabilities::cached(&key, &fingerprint) {
                return Ok(cached);
            }
        }

        let mut version_command = Command::new(&self.binary);
        version_command.arg("--version").current_dir(".");
        let version_output = self
            .invoke(version_command, sink, redactor, cancel, "git --version")
            .await?;
        let version = capabilities::parse_version_output(&version_output.stdout_text());

        let mut lfs_command = Command::new(&self.lfs_binary);
        lfs_command.arg("version").current_dir(".");
        let lfs_version = match self
            .invoke(lfs_command, sink, redactor, cancel, "git-lfs version")
            .await
        {
            Ok(output) => capabilities::parse_version_output(&output.stdout_text()),
            Err(_) => None,
        };

        Ok(capabilities::store(key, fingerprint, version, lfs_version))
    }

    pub async fn init(
        &self,
        working_dir: &Path,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, None, &["init"]),
            sink,
            redactor,
            cancel,
            "git init",
        )
        .await
    }

    pub async fn remote_add(
        &self,
        working_dir: &Path,
        name: &str,
        url: &str,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, None, &["remote", "add", name, url]),
            sink,
            redactor,
            cancel,
            &format!("git remote add {name} {url}"),
        )
        .await
    }

    pub async fn remote_set_url(
        &self,
        working_dir: &Path,
        name: &str,
        url: &str,
        push: bool,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        let mut args = vec!["remote", "set-url"];
        if push {
            args.push("--push");
        }
        args.push(name);
        args.push(url);
        self.invoke(
            self.command(working_dir, None, &args),
            sink,
            redactor,
            cancel,
            "git remote set-url",
        )
        .await
    }

    pub async fn get_fetch_url(
        &self,
        working_dir: &Path,
        name: &str,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, None, &["remote", "get-url", name]),
            sink,
            redactor,
            cancel,
            "git remote get-url",
        )
        .await
    }

    pub async fn config_get(
        &self,
        working_dir: &Path,
        key: &str,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, None, &["config", "--get", key]),
            sink,
            redactor,
            cancel,
            "git config --get <key>",
        )
        .await
    }

    pub async fn config_set(
        &self,
        working_dir: &Path,
        key: &str,
        value: &str,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, None, &["config", key, value]),
            sink,
            redactor,
            cancel,
            "git config <key> <value>",
        )
        .await
    }

    pub async fn config_unset(
        &self,
        working_dir: &Path,
        key: &str,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, None, &["config", "--unset-all", key]),
            sink,
            redactor,
            cancel,
            "git config --unset-all <key>",
        )
        .await
    }

    pub async fn config_exists(
        &self,
        working_dir: &Path,
        key: &str,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<bool, GitBinaryError> {
        let output = self
            .invoke(
                self.command(working_dir, None, &["config", "--get", key]),
                sink,
                redactor,
                cancel,
                "git config --get <key>",
            )
            .await?;
        Ok(output.status.success())
    }

    pub async fn disable_auto_gc(
        &self,
        working_dir: &Path,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, None, &["config", "gc.auto", "0"]),
            sink,
            redactor,
            cancel,
            "git config gc.auto 0",
        )
        .await
    }

    pub async fn fetch(
        &self,
        working_dir: &Path,
        extra_args: Option<&str>,
        refspecs: &[String],
        depth: Option<u32>,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        let mut args: Vec<String> = vec!["fetch".to_string(), "origin".to_string()];
        if let Some(depth) = depth {
            if depth > 0 {
                args.push(format!("--depth={depth}"));
            }
        }
        args.extend(refspecs.iter().cloned());
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        self.invoke(
            self.command(working_dir, extra_args, &args_ref),
            sink,
            redactor,
            cancel,
            "git fetch origin",
        )
        .await
    }

    pub async fn lfs_install(
        &self,
        working_dir: &Path,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, None, &["lfs", "install", "--local"]),
            sink,
            redactor,
            cancel,
            "git lfs install --local",
        )
        .await
    }

    pub async fn lfs_fetch(
        &self,
        working_dir: &Path,
        extra_args: Option<&str>,
        target: &str,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, extra_args, &["lfs", "fetch", "origin", target]),
            sink,
            redactor,
            cancel,
            "git lfs fetch origin <target>",
        )
        .await
    }

    pub async fn lfs_logs_last(
        &self,
        working_dir: &Path,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, None, &["lfs", "logs", "last"]),
            sink,
            redactor,
            cancel,
            "git lfs logs last",
        )
        .await
    }

    pub async fn checkout(
        &self,
        working_dir: &Path,
        target: &str,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, None, &["checkout", "--progress", "--force", target]),
            sink,
            redactor,
            cancel,
            "git checkout <target>",
        )
        .await
    }

    pub async fn clean(
        &self,
        working_dir: &Path,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, None, &["clean", "-fdx"]),
            sink,
            redactor,
            cancel,
            "git clean -fdx",
        )
        .await
    }

    pub async fn reset_hard(
        &self,
        working_dir: &Path,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(working_dir, None, &["reset", "--hard", "HEAD"]),
            sink,
            redactor,
            cancel,
            "git reset --hard HEAD",
        )
        .await
    }

    pub async fn submodule_sync(
        &self,
        working_dir: &Path,
        recursive: bool,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        let mut args = vec!["submodule", "sync"];
        if recursive {
            args.push("--recursive");
        }
        self.invoke(
            self.command(working_dir, None, &args),
            sink,
            redactor,
            cancel,
            "git submodule sync",
        )
        .await
    }

    pub async fn submodule_update(
        &self,
        working_dir: &Path,
        extra_args: Option<&str>,
        recursive: bool,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        let mut args = vec!["submodule", "update", "--init", "--force"];
        if recursive {
            args.push("--recursive");
        }
        self.invoke(
            self.command(working_dir, extra_args, &args),
            sink,
            redactor,
            cancel,
            "git submodule update --init --force",
        )
        .await
    }

    pub async fn submodule_foreach_clean(
        &self,
        working_dir: &Path,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(
                working_dir,
                None,
                &["submodule", "foreach", "--recursive", "git clean -fdx"],
            ),
            sink,
            redactor,
            cancel,
            "git submodule foreach --recursive git clean -fdx",
        )
        .await
    }

    pub async fn submodule_foreach_reset(
        &self,
        working_dir: &Path,
        sink: &dyn LogSink,
        redactor: &dyn LineRedactor,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GitBinaryError> {
        self.invoke(
            self.command(
                working_dir,
                None,
                &["submodule", "foreach", "--recursive", "git reset --hard HEAD"],
            ),
            sink,
            redactor,
            cancel,
            "git submodule foreach --recursive git reset --hard HEAD",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_extra_args_keeps_quoted_values_with_spaces_intact() {
        let tokens = split_extra_args(r#"-c http.extraheader="AUTHORIZATION: basic abc123""#);
        assert_eq!(tokens, vec!["-c", "http.extraheader=AUTHORIZATION: basic abc123"]);
    }

    #[test]
    fn split_extra_args_handles_multiple_pairs() {
        let tokens = split_extra_args(r#"-c http.sslVerify=false -c http.proxy="http://u:p@proxy:8080""#);
        assert_eq!(tokens, vec!["-c", "http.sslVerify=false", "-c", "http.proxy=http://u:p@proxy:8080"]);
    }

    #[test]
    fn split_extra_args_on_empty_string_yields_no_tokens() {
        assert!(split_extra_args("").is_empty());
    }
}
