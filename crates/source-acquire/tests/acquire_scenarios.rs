//! Drives the full acquisition state machine against a fake `git` script, the same
//! approach `git-binary`'s own integration tests use for capability probing.
#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine};
use git_binary::{GitBinary, TracingLogSink};
use source_acquire::{
    acquire, AcquireArgs, AgentCertificateBundle, AgentEnvironment, Credential, ProviderType,
    ProxySettings, RepositoryDescriptor, SecretRegistry, SystemConnection,
};
use tokio_util::sync::CancellationToken;
use url::Url;

fn write_fake_git(dir: &Path) -> PathBuf {
    let path = dir.join("fake-git");
    let script = r#"#!/bin/sh
case "$1" in
  remote)
    if [ "$2" = "get-url" ]; then exit 1; fi
    exit 0
    ;;
  config)
    if [ "$2" = "--get" ]; then exit 1; fi
    if [ "$2" = "--unset-all" ]; then exit 1; fi
    exit 0
    ;;
  init)
    mkdir -p .git
    exit 0
    ;;
  *) exit 0 ;;
esac
"#;
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// Like [`write_fake_git`], but reports a configurable `git --version` and appends
/// every invocation's argv to `log_path`, so a test can assert on what was (or
/// wasn't) run without a real repository behind it.
fn write_fake_git_with_version(dir: &Path, version: &str, log_path: &Path) -> PathBuf {
    let path = dir.join("fake-git");
    let script = format!(
        r#"#!/bin/sh
echo "$@" >> "{log}"
case "$1" in
  --version)
    echo "git version {version}"
    exit 0
    ;;
  version)
    echo "git-lfs/2.9.0 (GitHub; linux amd64; go1.21.0)"
    exit 0
    ;;
  remote)
    if [ "$2" = "get-url" ]; then exit 1; fi
    exit 0
    ;;
  config)
    if [ "$2" = "--get" ]; then exit 1; fi
    if [ "$2" = "--unset-all" ]; then exit 1; fi
    exit 0
    ;;
  init)
    mkdir -p .git
    exit 0
    ;;
  *) exit 0 ;;
esac
"#,
        log = log_path.display(),
    );
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn base_descriptor(target_path: PathBuf) -> RepositoryDescriptor {
    RepositoryDescriptor {
        alias: "w".into(),
        repo_type: ProviderType::GitHub,
        url: Url::parse("https://github.com/acme/w.git").unwrap(),
        branch: "refs/heads/main".into(),
        commit: None,
        target_path,
        clean: true,
        submodules: false,
        nested_submodules: false,
        accept_untrusted_certs: false,
        fetch_depth: 0,
        lfs: false,
        expose_credentials: false,
        on_prem_hosted: false,
    }
}

#[tokio::test]
async fn self_managed_credentials_reaches_done_with_a_fresh_working_tree() {
    let scratch = tempfile::tempdir().unwrap();
    let git_path = write_fake_git(scratch.path());
    let target_path = scratch.path().join("workdir");

    let git = GitBinary::new(git_path.clone(), git_path);
    let descriptor = base_descriptor(target_path.clone());
    let credential = Credential::None;
    let cert = AgentCertificateBundle::default();
    let proxy = ProxySettings::default();
    let system_connection = SystemConnection { url: Url::parse("https://control-plane.example.com").unwrap() };
    let environment = AgentEnvironment::new(scratch.path().join("tmp"), false, true);
    tokio::fs::create_dir_all(environment.temp_directory()).await.unwrap();
    let secrets = SecretRegistry::new();
    let sink = TracingLogSink;
    let cancel = CancellationToken::new();

    let args = AcquireArgs {
        descriptor: &descriptor,
        credential: &credential,
        cert: &cert,
        proxy: &proxy,
        system_connection: &system_connection,
        environment: &environment,
        secrets: &secrets,
        sink: &sink,
        cancel: &cancel,
    };

    acquire(&git, args).await.unwrap();

    assert!(target_path.join(".git").is_dir());
}

#[tokio::test]
async fn cancellation_before_fetch_short_circuits_without_scrubbing() {
    let scratch = tempfile::tempdir().unwrap();
    let git_path = write_fake_git(scratch.path());
    let target_path = scratch.path().join("workdir");

    let git = GitBinary::new(git_path.clone(), git_path);
    let descriptor = base_descriptor(target_path.clone());
    let credential = Credential::None;
    let cert = AgentCertificateBundle::default();
    let proxy = ProxySettings::default();
    let system_connection = SystemConnection { url: Url::parse("https://control-plane.example.com").unwrap() };
    let environment = AgentEnvironment::new(scratch.path().join("tmp"), false, true);
    tokio::fs::create_dir_all(environment.temp_directory()).await.unwrap();
    let secrets = SecretRegistry::new();
    let sink = TracingLogSink;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let args = AcquireArgs {
        descriptor: &descriptor,
        credential: &credential,
        cert: &cert,
        proxy: &proxy,
        system_connection: &system_connection,
        environment: &environment,
        secrets: &secrets,
        sink: &sink,
        cancel: &cancel,
    };

    let err = acquire(&git, args).await.unwrap_err();
    assert!(matches!(err, source_acquire::AcquireError::Cancelled { .. }));
}

#[tokio::test]
async fn basic_credential_uses_auth_header_and_leaves_remote_url_unembedded() {
    let scratch = tempfile::tempdir().unwrap();
    let log_path = scratch.path().join("invocations.log");
    git_binary::clear_capability_cache();
    let git_path = write_fake_git_with_version(scratch.path(), "2.20.1", &log_path);
    let target_path = scratch.path().join("workdir");

    let git = GitBinary::new(git_path.clone(), git_path);
    let descriptor = base_descriptor(target_path.clone());
    let credential = Credential::Basic { username: "x".into(), password: "tok".into() };
    let cert = AgentCertificateBundle::default();
    let proxy = ProxySettings::default();
    let system_connection = SystemConnection { url: Url::parse("https://control-plane.example.com").unwrap() };
    let environment = AgentEnvironment::new(scratch.path().join("tmp"), false, false);
    tokio::fs::create_dir_all(environment.temp_directory()).await.unwrap();
    let secrets = SecretRegistry::new();
    let sink = TracingLogSink;
    let cancel = CancellationToken::new();

    let args = AcquireArgs {
        descriptor: &descriptor,
        credential: &credential,
        cert: &cert,
        proxy: &proxy,
        system_connection: &system_connection,
        environment: &environment,
        secrets: &secrets,
        sink: &sink,
        cancel: &cancel,
    };

    acquire(&git, args).await.unwrap();

    assert!(target_path.join(".git").is_dir());

    let expected_secret = STANDARD.encode("x:tok");
    assert!(secrets.contains(&expected_secret));

    let log = fs::read_to_string(&log_path).unwrap();
    assert!(
        !log.lines().any(|line| line.starts_with("remote set-url")),
        "credentials should travel over the auth header, not an embedded remote url: {log}"
    );
    assert!(
        log.lines().any(|line| line.starts_with("checkout") && line.contains("refs/remotes/origin/main")),
        "expected a checkout onto refs/remotes/origin/main: {log}"
    );
}

#[tokio::test]
async fn under_version_binary_fails_closed_for_a_required_auth_header_provider() {
    let scratch = tempfile::tempdir().unwrap();
    let log_path = scratch.path().join("invocations.log");
    git_binary::clear_capability_cache();
    let git_path = write_fake_git_with_version(scratch.path(), "2.8.0", &log_path);
    let target_path = scratch.path().join("workdir");

    let git = GitBinary::new(git_path.clone(), git_path);
    let mut descriptor = base_descriptor(target_path.clone());
    descriptor.repo_type = ProviderType::CentralOnPrem;
    descriptor.lfs = true;
    let credential = Credential::Bearer("jwt".into());
    let cert = AgentCertificateBundle::default();
    let proxy = ProxySettings::default();
    let system_connection = SystemConnection { url: Url::parse("https://control-plane.example.com").unwrap() };
    let environment = AgentEnvironment::new(scratch.path().join("tmp"), false, false);
    tokio::fs::create_dir_all(environment.temp_directory()).await.unwrap();
    let secrets = SecretRegistry::new();
    let sink = TracingLogSink;
    let cancel = CancellationToken::new();

    let args = AcquireArgs {
        descriptor: &descriptor,
        credential: &credential,
        cert: &cert,
        proxy: &proxy,
        system_connection: &system_connection,
        environment: &environment,
        secrets: &secrets,
        sink: &sink,
        cancel: &cancel,
    };

    let err = acquire(&git, args).await.unwrap_err();
    assert!(matches!(
        err,
        source_acquire::AcquireError::Git(git_binary::GitBinaryError::RequirementNotMet { .. })
    ));
    assert!(!target_path.exists(), "a version-gate failure must not touch the working tree");
}

#[tokio::test]
async fn exposed_credentials_persist_auth_header_and_ssl_verify_to_disk() {
    let scratch = tempfile::tempdir().unwrap();
    let log_path = scratch.path().join("invocations.log");
    git_binary::clear_capability_cache();
    let git_path = write_fake_git_with_version(scratch.path(), "2.20.1", &log_path);
    let target_path = scratch.path().join("workdir");

    let git = GitBinary::new(git_path.clone(), git_path);
    let mut descriptor = base_descriptor(target_path.clone());
    descriptor.accept_untrusted_certs = true;
    descriptor.expose_credentials = true;
    let credential = Credential::Basic { username: "x".into(), password: "tok".into() };
    let cert = AgentCertificateBundle::default();
    let proxy = ProxySettings::default();
    let system_connection = SystemConnection { url: Url::parse("https://control-plane.example.com").unwrap() };
    let environment = AgentEnvironment::new(scratch.path().join("tmp"), false, false);
    tokio::fs::create_dir_all(environment.temp_directory()).await.unwrap();
    let secrets = SecretRegistry::new();
    let sink = TracingLogSink;
    let cancel = CancellationToken::new();

    let args = AcquireArgs {
        descriptor: &descriptor,
        credential: &credential,
        cert: &cert,
        proxy: &proxy,
        system_connection: &system_connection,
        environment: &environment,
        secrets: &secrets,
        sink: &sink,
        cancel: &cancel,
    };

    acquire(&git, args).await.unwrap();

    let log = fs::read_to_string(&log_path).unwrap();
    assert!(
        log.lines().any(|line| line.starts_with("config") && line.contains("extraheader") && line.contains("AUTHORIZATION")),
        "expected the auth header to be persisted for exposeCredentials: {log}"
    );
    assert!(
        log.lines().any(|line| line.starts_with("config") && line.contains("sslVerify") && line.contains("false")),
        "expected sslVerify=false to be persisted for acceptUntrustedCerts: {log}"
    );
}
