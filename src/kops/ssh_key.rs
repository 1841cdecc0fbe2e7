/// SSH key management for kops clusters
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ProvisionError;
use crate::utils::command::{CommandBuilder, Executor};
use crate::utils::idempotent::{ensure, Ensured};

/// Private key path matching a `.pub` public key path
pub fn private_key_path(public_key: &Path) -> Result<PathBuf> {
    match public_key.extension() {
        Some(ext) if ext == "pub" => Ok(public_key.with_extension("")),
        _ => Err(ProvisionError::guard(format!(
            "SSH public key path must end in .pub: {}",
            public_key.display()
        ))
        .into()),
    }
}

/// Ensure an SSH key pair exists at `public_key`
///
/// If the public key file is already present it is used as-is. Otherwise a 4096-bit RSA pair
/// without passphrase is generated with `ssh-keygen`; kops accepts RSA keys on every cloud.
pub async fn ensure_ssh_key<E: Executor>(exec: &E, public_key: &Path) -> Result<Ensured<PathBuf>> {
    let private_key = private_key_path(public_key)?;

    ensure(
        &format!("SSH key {}", public_key.display()),
        || async { Ok(public_key.exists().then(|| public_key.to_path_buf())) },
        || async {
            if let Some(parent) = public_key.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create SSH key directory")?;
            }

            info!("Generating RSA SSH key pair at {}", private_key.display());
            CommandBuilder::new("ssh-keygen")
                .args(["-t", "rsa", "-b", "4096", "-N", "", "-C", "kubestrap", "-f"])
                .path_arg(&private_key)
                .context("Failed to generate SSH key")
                .run_silent(exec)
                .await?;

            Ok(public_key.to_path_buf())
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::ScriptedExecutor;

    #[test]
    fn test_private_key_path() {
        assert_eq!(
            private_key_path(Path::new("/home/u/.ssh/id_rsa.pub")).unwrap(),
            PathBuf::from("/home/u/.ssh/id_rsa")
        );
        assert!(private_key_path(Path::new("/home/u/.ssh/id_rsa")).is_err());
    }

    #[tokio::test]
    async fn test_existing_key_not_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let public_key = dir.path().join("id_rsa.pub");
        std::fs::write(&public_key, "ssh-rsa AAAA kubestrap\n").unwrap();

        let exec = ScriptedExecutor::new();
        let ensured = ensure_ssh_key(&exec, &public_key).await.unwrap();

        assert_eq!(ensured, Ensured::Existing(public_key));
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_generated() {
        let dir = tempfile::tempdir().unwrap();
        let public_key = dir.path().join("keys").join("cluster.pub");

        let exec = ScriptedExecutor::new();
        let ensured = ensure_ssh_key(&exec, &public_key).await.unwrap();

        assert!(ensured.was_created());
        assert!(dir.path().join("keys").is_dir());
        let calls = exec.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("ssh-keygen -t rsa -b 4096"));
        assert!(calls[0].ends_with("keys/cluster"));
    }
}
