/// kops cluster operations client
use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::config::{KopsConfig, Session};
use crate::error::ProvisionError;
use crate::utils::command::{CommandBuilder, Executor};
use crate::utils::idempotent::{ensure, Ensured};
use crate::utils::retry::RetryPolicy;

/// kops client; every command carries `NAME` and `KOPS_STATE_STORE` from the session
pub struct KopsClient<'a, E> {
    exec: &'a E,
    session: Session,
    config: KopsConfig,
}

/// Whether stderr is kops reporting the named cluster as absent
///
/// kops prints `cluster not found "<name>"` or `cluster "<name>" not found`; other failures
/// (state store access, DNS, network) must not be read as absence.
fn is_cluster_not_found(stderr: &str, name: &str) -> bool {
    let quoted = format!("\"{}\"", name);
    stderr.lines().any(|line| {
        let line = line.trim();
        line.contains(&format!("cluster not found {}", quoted))
            || line.contains(&format!("cluster {} not found", quoted))
    })
}

impl<'a, E: Executor> KopsClient<'a, E> {
    /// Create a new kops client
    pub fn new(exec: &'a E, session: Session, config: KopsConfig) -> Self {
        Self {
            exec,
            session,
            config,
        }
    }

    fn kops<I, S>(&self, args: I) -> CommandBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandBuilder::new("kops")
            .args(args)
            .args(["--name", self.session.name.as_str()])
            .envs(self.session.env_vars())
    }

    /// Whether the cluster spec exists in the state store
    pub async fn cluster_exists(&self) -> Result<bool> {
        let output = self
            .kops(["get", "cluster"])
            .context("Failed to query kops cluster")
            .output(self.exec)
            .await?;

        if output.success {
            return Ok(true);
        }

        if is_cluster_not_found(&output.stderr, &self.session.name) {
            return Ok(false);
        }

        Err(ProvisionError::CommandFailed {
            program: "kops".to_string(),
            code: output.code,
            stderr: output.stderr,
        }
        .into())
    }

    /// Arguments for `kops create cluster`
    pub fn create_args(&self, ssh_public_key: &Path) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "cluster".to_string(),
            format!("--zones={}", self.config.zones.join(",")),
            format!("--node-count={}", self.config.node_count),
            format!("--node-size={}", self.config.node_size),
            format!("--control-plane-size={}", self.config.control_plane_size),
            format!("--networking={}", self.config.networking),
            format!("--ssh-public-key={}", ssh_public_key.display()),
        ];

        if self.config.dns_zone.is_some() {
            args.push("--dns=private".to_string());
        }

        if let Some(version) = &self.config.kubernetes_version {
            args.push(format!("--kubernetes-version={}", version));
        }

        args
    }

    /// Create the cluster spec unless it already exists
    pub async fn ensure_cluster(&self, ssh_public_key: &Path) -> Result<Ensured<String>> {
        let name = self.session.name.clone();
        ensure(
            &format!("kops cluster {}", name),
            || async { Ok(self.cluster_exists().await?.then(|| name.clone())) },
            || async {
                self.kops(self.create_args(ssh_public_key))
                    .context("Failed to create kops cluster")
                    .run_silent(self.exec)
                    .await?;
                Ok(name.clone())
            },
        )
        .await
    }

    /// Apply the cluster spec to AWS
    pub async fn update_cluster(&self) -> Result<()> {
        info!("Applying cluster spec (kops update cluster --yes)...");
        self.kops(["update", "cluster", "--yes", "--admin"])
            .context("Failed to update kops cluster")
            .run_silent(self.exec)
            .await?;
        info!("✓ Cluster resources applied");
        Ok(())
    }

    /// Write an admin kubeconfig for the cluster
    pub async fn export_kubeconfig(&self, path: &Path) -> Result<()> {
        self.kops(["export", "kubeconfig", "--admin"])
            .arg("--kubeconfig")
            .path_arg(path)
            .context("Failed to export kubeconfig")
            .run_silent(self.exec)
            .await?;
        info!("Kubeconfig written to {}", path.display());
        Ok(())
    }

    /// Validate the cluster, retrying under `policy`
    ///
    /// Each attempt lets kops itself wait up to `validate_wait`.
    pub async fn validate(&self, policy: &RetryPolicy) -> Result<u32> {
        let retried = policy
            .run(|| {
                self.kops(["validate", "cluster", "--wait", self.config.validate_wait.as_str()])
                    .context("Cluster validation failed")
                    .run_silent(self.exec)
            })
            .await?;
        Ok(retried.attempts)
    }

    /// Delete the cluster and every AWS resource kops created for it
    pub async fn delete_cluster(&self) -> Result<()> {
        if !self.cluster_exists().await? {
            info!("kops cluster {} not found, nothing to delete", self.session.name);
            return Ok(());
        }

        info!("Deleting kops cluster {}...", self.session.name);
        self.kops(["delete", "cluster", "--yes"])
            .context("Failed to delete kops cluster")
            .run_silent(self.exec)
            .await?;
        info!("✓ kops cluster deleted");
        Ok(())
    }

    /// Instance groups as printed by kops
    pub async fn instance_groups(&self) -> Result<String> {
        self.kops(["get", "instancegroups"])
            .context("Failed to list instance groups")
            .run(self.exec)
            .await
    }
}
