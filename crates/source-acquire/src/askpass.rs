//! The client-key askpass helper: a small executable script whose sole effect is to
//! print a passphrase on standard output, used when the client private key is itself
//! password-protected.

use std::path::{Path, PathBuf};

use tokio::{fs, io::AsyncWriteExt};

use crate::error::AcquireError;

#[cfg(unix)]
const MODE: u32 = 0o775;

/// A provisioned askpass helper script. Dropped (logically, via [`AskpassHelper::cleanup`])
/// at the end of *Finalize* unless `exposeCredentials` is set.
#[derive(Clone, Debug)]
pub struct AskpassHelper {
    path: PathBuf,
}

impl AskpassHelper {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the helper script under `temp_dir`, naming it uniquely per `alias` so
    /// concurrent acquisitions against distinct repositories never collide.
    pub async fn provision(temp_dir: &Path, alias: &str, password: &str) -> Result<Self, AcquireError> {
        let path = temp_dir.join(format!("askpass-{alias}.sh"));
        let script = format!("#!/bin/sh\nprintf '%s' \"{}\"\n", shell_escape(password));

        let mut file = fs::File::create(&path).await.map_err(|source| AcquireError::WorkingCopyIo {
            path: path.clone(),
            source,
        })?;
        file.write_all(script.as_bytes()).await.map_err(|source| AcquireError::WorkingCopyIo {
            path: path.clone(),
            source,
        })?;
        file.flush().await.map_err(|source| AcquireError::WorkingCopyIo { path: path.clone(), source })?;

        set_executable(&path).await?;

        Ok(Self { path })
    }

    /// Deletes the helper script. Best-effort: a missing file is not an error.
    pub async fn cleanup(&self) {
        if let Err(err) = fs::remove_file(&self.path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove askpass helper");
            }
        }
    }
}

fn shell_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('$', "\\$").replace('`', "\\`")
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<(), AcquireError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(MODE);
    fs::set_permissions(path, perms)
        .await
        .map_err(|source| AcquireError::WorkingCopyIo { path: path.to_path_buf(), source })
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<(), AcquireError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provisions_and_cleans_up_the_helper() {
        let dir = tempfile::tempdir().unwrap();
        let helper = AskpassHelper::provision(dir.path(), "w", "s3cr3t").await.unwrap();
        assert!(helper.path().exists());

        let contents = tokio::fs::read_to_string(helper.path()).await.unwrap();
        assert!(contents.contains("s3cr3t"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(helper.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, MODE);
        }

        helper.cleanup().await;
        assert!(!helper.path().exists());
    }

    #[tokio::test]
    async fn cleanup_of_missing_file_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let helper = AskpassHelper { path: dir.path().join("already-gone.sh") };
        helper.cleanup().await;
    }
}
