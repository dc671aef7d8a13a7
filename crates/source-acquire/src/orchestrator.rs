//! The acquisition state machine: reconciles the on-disk state of a working tree at
//! `descriptor.targetPath` with the requested revision, using the external-binary
//! adapter, the URL/credential utilities, and the provider policy table.

use std::path::Path;

use git_binary::{CapabilityCachePolicy, GitBinary, GitCapabilities, LogSink};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    askpass::AskpassHelper,
    config_state,
    env::AgentEnvironment,
    error::AcquireError,
    model::{
        AgentCertificateBundle, ConfigModification, Credential, ProxySettings, RepositoryDescriptor,
        SecretRegistry, SystemConnection, WorkingCopyState,
    },
    provider::{render_auth_header, AuthHeaderPolicy},
    url_creds::{credential_embed, credential_strip, derive_lfs_url, to_remote_ref},
};

/// The full argument bundle for one acquisition — an explicit bundle rather than
/// ambient context, per the design notes.
pub struct AcquireArgs<'a> {
    pub descriptor: &'a RepositoryDescriptor,
    pub credential: &'a Credential,
    pub cert: &'a AgentCertificateBundle,
    pub proxy: &'a ProxySettings,
    pub system_connection: &'a SystemConnection,
    pub environment: &'a AgentEnvironment,
    pub secrets: &'a SecretRegistry,
    pub sink: &'a dyn LogSink,
    pub cancel: &'a CancellationToken,
}

/// Runs the state machine in §4.1 to completion, leaving a working tree at
/// `descriptor.targetPath` positioned at the requested revision.
pub async fn acquire(git: &GitBinary, args: AcquireArgs<'_>) -> Result<(), AcquireError> {
    args.descriptor.validate()?;
    check_cancelled(args.descriptor, args.cancel)?;

    let plan = CredentialPlan::build(git, &args).await?;

    let working_dir = args.descriptor.target_path.clone();
    let state = probe_working_copy_state(git, &working_dir, &args.descriptor.url, &args).await?;

    let needs_purge = match state {
        WorkingCopyState::Absent | WorkingCopyState::Foreign => true,
        WorkingCopyState::Local | WorkingCopyState::Locked => {
            !reconcile(git, &working_dir, state, &args).await?
        }
    };

    if needs_purge {
        purge_recursive(&working_dir, args.cancel).await?;
        initialize(git, &working_dir, &args).await?;
    }

    check_cancelled(args.descriptor, args.cancel)?;
    let mut modification = ConfigModification::new();
    prepare(git, &working_dir, &plan, &args, &mut modification).await?;

    check_cancelled(args.descriptor, args.cancel)?;
    fetch_and_resolve(git, &working_dir, &plan, &args).await?;

    check_cancelled(args.descriptor, args.cancel)?;
    if args.descriptor.submodules {
        update_submodules(git, &working_dir, &plan, &args).await?;
    }

    check_cancelled(args.descriptor, args.cancel)?;
    finalize(git, &working_dir, &plan, &args, &mut modification).await?;

    Ok(())
}

fn check_cancelled(descriptor: &RepositoryDescriptor, cancel: &CancellationToken) -> Result<(), AcquireError> {
    if cancel.is_cancelled() {
        Err(AcquireError::Cancelled { alias: descriptor.alias.clone() })
    } else {
        Ok(())
    }
}

/// The credential strategy resolved once per acquisition: whether to use a cmdline
/// auth header (and its rendered value), or fall back to URL-embedded credentials.
struct CredentialPlan {
    auth_header: Option<String>,
    embedded_credentials: Option<(String, String)>,
    askpass: Option<AskpassHelper>,
    supports_tls_backend_override: bool,
}

impl CredentialPlan {
    async fn build(git: &GitBinary, args: &AcquireArgs<'_>) -> Result<Self, AcquireError> {
        let capabilities = probe(git, args).await?;
        let supports_tls_backend_override = capabilities.supports_tls_backend_override();

        if args.environment.self_manage_git_creds || matches!(args.credential, Credential::None) {
            return Ok(Self {
                auth_header: None,
                embedded_credentials: None,
                askpass: None,
                supports_tls_backend_override,
            });
        }

        let policy = args.descriptor.repo_type.auth_header_policy();
        let use_header = match policy {
            AuthHeaderPolicy::Never => false,
            AuthHeaderPolicy::Preferred => {
                capabilities.ensure_version(args.descriptor.repo_type.minimum_header_version(), false)?
            }
            AuthHeaderPolicy::Required => {
                capabilities.ensure_version(args.descriptor.repo_type.minimum_header_version(), true)?
            }
        };

        let auth_header = if use_header {
            render_auth_header(args.descriptor.repo_type, args.credential)
        } else {
            None
        };

        let embedded_credentials = if auth_header.is_none() {
            match args.credential.userinfo() {
                Some((user, pass)) => Some((user.to_string(), pass.to_string())),
                None => {
                    args.sink.warning(&format!(
                        "credential scheme unsupported for provider without cmdline auth header support on `{}`; proceeding without credentials",
                        args.descriptor.alias
                    ));
                    None
                }
            }
        } else {
            None
        };

        if let Some(header) = &auth_header {
            if let Some((_, secret)) = header.split_once(' ') {
                args.secrets.add(secret.to_string());
            }
        }
        if let Some((_, password)) = &embedded_credentials {
            args.secrets.add(password.clone());
        }

        let askpass = match &args.cert.client_key_password {
            Some(password) if args.system_connection.shares_authority_with(&args.descriptor.url) => {
                args.secrets.add(password.clone());
                Some(AskpassHelper::provision(args.environment.temp_directory(), &args.descriptor.alias, password).await?)
            }
            _ => None,
        };

        Ok(Self { auth_header, embedded_credentials, askpass, supports_tls_backend_override })
    }

    fn remote_url(&self, base: &Url) -> Result<String, AcquireError> {
        match &self.embedded_credentials {
            Some((user, pass)) => credential_embed(base, user, pass),
            None => Ok(base.to_string()),
        }
    }

    fn extra_args(&self, repo_url: &Url, args: &AcquireArgs<'_>, authority_scope: Option<&str>) -> String {
        assemble_extra_args(
            repo_url,
            self.auth_header.as_deref(),
            args.proxy,
            args.descriptor.accept_untrusted_certs,
            args.system_connection.shares_authority_with(repo_url).then_some(args.cert),
            self.askpass.as_ref().map(AskpassHelper::path),
            authority_scope,
            args.secrets,
            self.supports_tls_backend_override,
        )
    }
}

async fn probe(git: &GitBinary, args: &AcquireArgs<'_>) -> Result<GitCapabilities, AcquireError> {
    Ok(git
        .probe_capabilities(CapabilityCachePolicy::PreferCache, args.sink, args.secrets, args.cancel)
        .await?)
}

async fn probe_working_copy_state(
    git: &GitBinary,
    working_dir: &Path,
    requested_url: &Url,
    args: &AcquireArgs<'_>,
) -> Result<WorkingCopyState, AcquireError> {
    let is_empty_or_missing = match tokio::fs::read_dir(working_dir).await {
        Ok(mut entries) => entries.next_entry().await.ok().flatten().is_none(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
        Err(source) => return Err(AcquireError::WorkingCopyIo { path: working_dir.to_path_buf(), source }),
    };
    if is_empty_or_missing {
        return Ok(WorkingCopyState::Absent);
    }

    let recorded = git
        .get_fetch_url(working_dir, "origin", args.sink, args.secrets, args.cancel)
        .await
        .map(|output| output.stdout_text().trim().to_string())
        .unwrap_or_default();

    let matches_requested = Url::parse(&recorded)
        .ok()
        .and_then(|recorded_url| credential_strip(&recorded_url).ok())
        .map(|sanitized| sanitized.as_str() == requested_url.as_str())
        .unwrap_or(false);

    if !matches_requested {
        return Ok(WorkingCopyState::Foreign);
    }

    let lock_path = working_dir.join(".git").join("index.lock");
    if tokio::fs::try_exists(&lock_path).await.unwrap_or(false) {
        Ok(WorkingCopyState::Locked)
    } else {
        Ok(WorkingCopyState::Local)
    }
}

/// Returns `true` when reconciliation succeeded in place (no purge needed).
async fn reconcile(
    git: &GitBinary,
    working_dir: &Path,
    state: WorkingCopyState,
    args: &AcquireArgs<'_>,
) -> Result<bool, AcquireError> {
    if state == WorkingCopyState::Locked {
        let lock_path = working_dir.join(".git").join("index.lock");
        if let Err(err) = tokio::fs::remove_file(&lock_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                args.sink.warning(&format!("failed to remove index lock at {}: {err}", lock_path.display()));
            }
        }
    }

    if !args.descriptor.clean {
        return Ok(true);
    }

    Ok(soft_clean(git, working_dir, args).await.is_ok())
}

async fn soft_clean(git: &GitBinary, working_dir: &Path, args: &AcquireArgs<'_>) -> Result<(), AcquireError> {
    let outcomes = [
        git.clean(working_dir, args.sink, args.secrets, args.cancel).await,
        git.reset_hard(working_dir, args.sink, args.secrets, args.cancel).await,
    ];
    for outcome in outcomes {
        let output = outcome?;
        if !output.status.success() {
            return Err(AcquireError::Git(git_binary::GitBinaryError::NonZeroExit {
                command: "git clean/reset".to_string(),
                status: output.status,
            }));
        }
    }

    if args.descriptor.submodules {
        let foreach_outcomes = [
            git.submodule_foreach_clean(working_dir, args.sink, args.secrets, args.cancel).await,
            git.submodule_foreach_reset(working_dir, args.sink, args.secrets, args.cancel).await,
        ];
        for outcome in foreach_outcomes {
            let output = outcome?;
            if !output.status.success() {
                return Err(AcquireError::Git(git_binary::GitBinaryError::NonZeroExit {
                    command: "git submodule foreach clean/reset".to_string(),
                    status: output.status,
                }));
            }
        }
    }

    Ok(())
}

/// Recursively deletes `path`, checking cancellation between every directory level.
fn purge_recursive<'a>(
    path: &'a Path,
    cancel: &'a CancellationToken,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), AcquireError>> + Send + 'a>> {
    Box::pin(async move {
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled { alias: String::new() });
        }
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(AcquireError::WorkingCopyIo { path: path.to_path_buf(), source }),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| AcquireError::WorkingCopyIo { path: path.to_path_buf(), source })?
        {
            let entry_path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|source| AcquireError::WorkingCopyIo { path: entry_path.clone(), source })?;
            if file_type.is_dir() {
                purge_recursive(&entry_path, cancel).await?;
            } else {
                tokio::fs::remove_file(&entry_path)
                    .await
                    .map_err(|source| AcquireError::WorkingCopyIo { path: entry_path.clone(), source })?;
            }
        }

        match tokio::fs::remove_dir(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(AcquireError::WorkingCopyIo { path: path.to_path_buf(), source }),
        }
    })
}

async fn initialize(git: &GitBinary, working_dir: &Path, args: &AcquireArgs<'_>) -> Result<(), AcquireError> {
    tokio::fs::create_dir_all(working_dir)
        .await
        .map_err(|source| AcquireError::WorkingCopyIo { path: working_dir.to_path_buf(), source })?;
    git.init(working_dir, args.sink, args.secrets, args.cancel).await?;
    git.remote_add(
        working_dir,
        "origin",
        args.descriptor.url.as_str(),
        args.sink,
        args.secrets,
        args.cancel,
    )
    .await?;
    Ok(())
}

async fn prepare(
    git: &GitBinary,
    working_dir: &Path,
    plan: &CredentialPlan,
    args: &AcquireArgs<'_>,
    modification: &mut ConfigModification,
) -> Result<(), AcquireError> {
    if let Ok(output) = git.disable_auto_gc(working_dir, args.sink, args.secrets, args.cancel).await {
        if !output.status.success() {
            args.sink.warning("failed to disable gc.auto; continuing");
        }
    } else {
        args.sink.warning("failed to disable gc.auto; continuing");
    }

    let authority_key = format!("http.{}.extraheader", authority_of(&args.descriptor.url));
    let _ = config_state::remove_key(git, working_dir, &authority_key, modification, args.sink, args.secrets, args.cancel).await;
    let _ = config_state::remove_key(git, working_dir, "http.proxy", modification, args.sink, args.secrets, args.cancel).await;

    if plan.embedded_credentials.is_some() {
        let embedded = plan.remote_url(&args.descriptor.url)?;
        git.remote_set_url(working_dir, "origin", &embedded, false, args.sink, args.secrets, args.cancel).await?;
        git.remote_set_url(working_dir, "origin", &embedded, true, args.sink, args.secrets, args.cancel).await?;

        if args.descriptor.lfs {
            let lfs_url = derive_lfs_url(&embedded);
            config_state::set_and_record(
                git,
                working_dir,
                "remote.origin.lfsurl",
                &lfs_url,
                modification,
                args.sink,
                args.secrets,
                args.cancel,
            )
            .await?;
            config_state::set_and_record(
                git,
                working_dir,
                "remote.origin.lfspushurl",
                &lfs_url,
                modification,
                args.sink,
                args.secrets,
                args.cancel,
            )
            .await?;
        }
    }

    Ok(())
}

async fn fetch_and_resolve(
    git: &GitBinary,
    working_dir: &Path,
    plan: &CredentialPlan,
    args: &AcquireArgs<'_>,
) -> Result<(), AcquireError> {
    let descriptor = args.descriptor;
    let extra_args = plan.extra_args(&descriptor.url, args, None);
    let extra_args_ref = if extra_args.is_empty() { None } else { Some(extra_args.as_str()) };

    let mut refspecs = Vec::new();
    if descriptor.is_pull_request_ref() {
        refspecs.push("+refs/heads/*:refs/remotes/origin/*".to_string());
        refspecs.push(format!("+{}:{}", descriptor.branch, to_remote_ref(&descriptor.branch)));
    }

    let depth = if descriptor.fetch_depth > 0 { Some(descriptor.fetch_depth) } else { None };
    args.sink.progress(0, "fetch");
    git.fetch(working_dir, extra_args_ref, &refspecs, depth, args.sink, args.secrets, args.cancel).await?;

    let target = if descriptor.is_pull_request_ref() || !descriptor.checkout_by_commit() {
        to_remote_ref(&descriptor.branch)
    } else {
        descriptor.commit.clone().expect("checkout_by_commit implies commit is set")
    };

    if descriptor.lfs {
        let lfs_extra_args = plan.extra_args(&descriptor.url, args, None);
        let lfs_extra_args_ref = if lfs_extra_args.is_empty() { None } else { Some(lfs_extra_args.as_str()) };
        let fetch_result = git
            .lfs_fetch(working_dir, lfs_extra_args_ref, &target, args.sink, args.secrets, args.cancel)
            .await;
        if let Err(lfs_err) = fetch_result {
            let logs = git.lfs_logs_last(working_dir, args.sink, args.secrets, args.cancel).await;
            let logs_text = logs.map(|o| o.stdout_text()).unwrap_or_default();
            args.sink.error(&format!("lfs fetch failed: {lfs_err}; last lfs log: {logs_text}"));
            return Err(lfs_err.into());
        }
    }

    args.sink.progress(80, "checkout");
    match git.checkout(working_dir, &target, args.sink, args.secrets, args.cancel).await {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => {
            warn_on_shallow_checkout_failure(descriptor, args);
            Err(AcquireError::Git(git_binary::GitBinaryError::NonZeroExit {
                command: "git checkout".to_string(),
                status: output.status,
            }))
        }
        Err(err) => {
            warn_on_shallow_checkout_failure(descriptor, args);
            Err(err.into())
        }
    }
}

fn warn_on_shallow_checkout_failure(descriptor: &RepositoryDescriptor, args: &AcquireArgs<'_>) {
    if descriptor.fetch_depth > 0 {
        args.sink.warning(&format!(
            "checkout failed at fetch depth {}; the requested revision may not be reachable in a shallow clone",
            descriptor.fetch_depth
        ));
    }
}

async fn update_submodules(
    git: &GitBinary,
    working_dir: &Path,
    plan: &CredentialPlan,
    args: &AcquireArgs<'_>,
) -> Result<(), AcquireError> {
    args.sink.progress(90, "submodules");
    let authority = authority_of(&args.descriptor.url);
    let submodule_args = plan.extra_args(&args.descriptor.url, args, Some(&authority));
    let submodule_args_ref = if submodule_args.is_empty() { None } else { Some(submodule_args.as_str()) };

    git.submodule_sync(working_dir, args.descriptor.nested_submodules, args.sink, args.secrets, args.cancel).await?;
    git.submodule_update(
        working_dir,
        submodule_args_ref,
        args.descriptor.nested_submodules,
        args.sink,
        args.secrets,
        args.cancel,
    )
    .await?;
    Ok(())
}

async fn finalize(
    git: &GitBinary,
    working_dir: &Path,
    plan: &CredentialPlan,
    args: &AcquireArgs<'_>,
    modification: &mut ConfigModification,
) -> Result<(), AcquireError> {
    let descriptor = args.descriptor;

    if descriptor.expose_credentials {
        if let Some(header) = &plan.auth_header {
            let key = format!("http.{}.extraheader", authority_of(&descriptor.url));
            config_state::set_and_record(
                git,
                working_dir,
                &key,
                &format!("AUTHORIZATION: {header}"),
                modification,
                args.sink,
                args.secrets,
                args.cancel,
            )
            .await?;
        }
        if args.proxy.is_configured() && !args.proxy.is_bypassed(&descriptor.url) {
            let proxy_url = proxy_url_with_creds(args.proxy, args.secrets);
            config_state::set_and_record(
                git,
                working_dir,
                "http.proxy",
                &proxy_url,
                modification,
                args.sink,
                args.secrets,
                args.cancel,
            )
            .await?;
        }
        if descriptor.accept_untrusted_certs {
            config_state::set_and_record(
                git,
                working_dir,
                "http.sslVerify",
                "false",
                modification,
                args.sink,
                args.secrets,
                args.cancel,
            )
            .await?;
        }
        if args.system_connection.shares_authority_with(&descriptor.url) {
            if let Some(ca) = &args.cert.ca_file {
                config_state::set_and_record(
                    git,
                    working_dir,
                    "http.sslcainfo",
                    &ca.display().to_string(),
                    modification,
                    args.sink,
                    args.secrets,
                    args.cancel,
                )
                .await?;
            }
            if args.cert.has_client_cert() {
                config_state::set_and_record(
                    git,
                    working_dir,
                    "http.sslcert",
                    &args.cert.client_cert_file.as_ref().unwrap().display().to_string(),
                    modification,
                    args.sink,
                    args.secrets,
                    args.cancel,
                )
                .await?;
                config_state::set_and_record(
                    git,
                    working_dir,
                    "http.sslkey",
                    &args.cert.client_key_file.as_ref().unwrap().display().to_string(),
                    modification,
                    args.sink,
                    args.secrets,
                    args.cancel,
                )
                .await?;
                if let Some(askpass) = &plan.askpass {
                    config_state::set_and_record(
                        git,
                        working_dir,
                        "core.askpass",
                        &askpass.path().display().to_string(),
                        modification,
                        args.sink,
                        args.secrets,
                        args.cancel,
                    )
                    .await?;
                }
            }
        }
        return Ok(());
    }

    if let Some((user, pass)) = &plan.embedded_credentials {
        let embedded = credential_embed(&descriptor.url, user, pass)?;
        let sanitized = descriptor.url.as_str();
        config_state::remove_url_credential(
            git,
            working_dir,
            "origin",
            &embedded,
            sanitized,
            args.sink,
            args.secrets,
            args.cancel,
        )
        .await?;

        if descriptor.lfs {
            let _ = config_state::remove_key(git, working_dir, "remote.origin.lfsurl", modification, args.sink, args.secrets, args.cancel).await;
            let _ = config_state::remove_key(git, working_dir, "remote.origin.lfspushurl", modification, args.sink, args.secrets, args.cancel).await;
        }
    }

    if let Some(askpass) = &plan.askpass {
        askpass.cleanup().await;
    }

    Ok(())
}

fn authority_of(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), url.host_str().unwrap_or(""), port),
        None => format!("{}://{}", url.scheme(), url.host_str().unwrap_or("")),
    }
}

#[allow(clippy::too_many_arguments)]
fn assemble_extra_args(
    repo_url: &Url,
    auth_header: Option<&str>,
    proxy: &ProxySettings,
    accept_untrusted_certs: bool,
    cert: Option<&AgentCertificateBundle>,
    askpass_path: Option<&Path>,
    authority_scope: Option<&str>,
    secrets: &SecretRegistry,
    supports_tls_backend_override: bool,
) -> String {
    let mut parts = Vec::new();
    let key = |base: &str| match authority_scope {
        Some(authority) => format!("http.{authority}.{base}"),
        None => format!("http.{base}"),
    };

    if let Some(header) = auth_header {
        if let Some((_, secret)) = header.split_once(' ') {
            secrets.add(secret.to_string());
        }
        parts.push(format!("-c {}=\"AUTHORIZATION: {}\"", key("extraheader"), header));
    }
    if proxy.is_configured() && !proxy.is_bypassed(repo_url) {
        let proxy_url = proxy_url_with_creds(proxy, secrets);
        parts.push(format!("-c http.proxy=\"{proxy_url}\""));
    }
    if accept_untrusted_certs {
        parts.push(format!("-c {}=false", key("sslVerify")));
    }
    if let Some(cert) = cert {
        if let Some(ca) = &cert.ca_file {
            parts.push(format!("-c {}=\"{}\"", key("sslcainfo"), ca.display()));
        }
        if cert.has_client_cert() {
            parts.push(format!(
                "-c {}=\"{}\"",
                key("sslcert"),
                cert.client_cert_file.as_ref().unwrap().display()
            ));
            parts.push(format!(
                "-c {}=\"{}\"",
                key("sslkey"),
                cert.client_key_file.as_ref().unwrap().display()
            ));
            if cert.client_key_password.is_some() {
                parts.push(format!("-c {}=true", key("sslCertPasswordProtected")));
                if let Some(helper) = askpass_path {
                    parts.push(format!("-c core.askpass=\"{}\"", helper.display()));
                }
            }
        }
    }
    if cfg!(windows) && supports_tls_backend_override {
        parts.push("-c http.sslbackend=schannel".to_string());
    }
    parts.join(" ")
}

fn proxy_url_with_creds(proxy: &ProxySettings, secrets: &SecretRegistry) -> String {
    if proxy.username.is_empty() && proxy.password.is_empty() {
        return proxy.address.clone();
    }
    let Ok(base) = Url::parse(&proxy.address) else {
        return proxy.address.clone();
    };
    secrets.add(proxy.password.clone());
    credential_embed(&base, &proxy.username, &proxy.password).unwrap_or_else(|_| proxy.address.clone())
}
