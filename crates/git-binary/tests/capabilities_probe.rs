//! Probes capability detection against fake `git`/`git-lfs` scripts so the version
//! parsing and minimum-version gates are exercised without depending on a real
//! toolchain being installed in CI.
#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use git_binary::{CapabilityCachePolicy, GitBinary, NoopRedactor, TracingLogSink};
use tokio_util::sync::CancellationToken;

fn write_fake_binary(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

#[tokio::test]
async fn probes_version_and_clears_cache_between_binaries() {
    let dir = tempfile::tempdir().unwrap();
    let git = write_fake_binary(
        dir.path(),
        "fake-git",
        "#!/bin/sh\necho 'git version 2.43.0'\n",
    );
    let lfs = write_fake_binary(
        dir.path(),
        "fake-git-lfs",
        "#!/bin/sh\necho 'git-lfs/3.4.1 (GitHub; linux amd64; go1.21.0)'\n",
    );

    git_binary::clear_capability_cache();
    let adapter = GitBinary::new(git, lfs);
    let sink = TracingLogSink;
    let redactor = NoopRedactor;
    let cancel = CancellationToken::new();

    let caps = adapter
        .probe_capabilities(CapabilityCachePolicy::PreferCache, &sink, &redactor, &cancel)
        .await
        .unwrap();

    assert!(caps.supports_cmdline_auth_header());
    assert!(caps.lfs_supports_auth_header());
    assert!(!caps.supports_tls_backend_override());
}

#[tokio::test]
async fn version_one_minor_below_requirement_is_rejected_when_strict() {
    let dir = tempfile::tempdir().unwrap();
    let git = write_fake_binary(dir.path(), "fake-git-old", "#!/bin/sh\necho 'git version 2.8.0'\n");
    let lfs = write_fake_binary(dir.path(), "fake-git-lfs-old", "#!/bin/sh\nexit 1\n");

    git_binary::clear_capability_cache();
    let adapter = GitBinary::new(git, lfs);
    let sink = TracingLogSink;
    let redactor = NoopRedactor;
    let cancel = CancellationToken::new();

    let caps = adapter
        .probe_capabilities(CapabilityCachePolicy::Bypass, &sink, &redactor, &cancel)
        .await
        .unwrap();

    let err = caps
        .ensure_version(git_binary::MIN_CMDLINE_AUTH_HEADER, true)
        .unwrap_err();
    assert!(matches!(err, git_binary::GitBinaryError::RequirementNotMet { .. }));
}
