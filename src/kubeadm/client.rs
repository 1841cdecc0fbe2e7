/// kubeadm control plane operations
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{KubeadmConfig, NetworkPlugin};
use crate::error::ProvisionError;
use crate::k8s::{NodeManager, ResourceManager};
use crate::utils::command::{CommandBuilder, Executor};
use crate::utils::idempotent::{ensure, Ensured};
use crate::utils::retry::RetryPolicy;

/// Filesystem root host preparation writes beneath
const HOST_ROOT: &str = "/";

/// Admin kubeconfig written by `kubeadm init`
pub const ADMIN_CONF: &str = "/etc/kubernetes/admin.conf";

const FLANNEL_MANIFEST: &str =
    "https://github.com/flannel-io/flannel/releases/latest/download/kube-flannel.yml";
const CALICO_MANIFEST: &str =
    "https://raw.githubusercontent.com/projectcalico/calico/v3.27.3/manifests/calico.yaml";

const CONTROL_PLANE_TAINT: &str = "node-role.kubernetes.io/control-plane-";

impl NetworkPlugin {
    /// Manifest applied with `kubectl apply -f`
    pub fn manifest_url(&self) -> &'static str {
        match self {
            NetworkPlugin::Flannel => FLANNEL_MANIFEST,
            NetworkPlugin::Calico => CALICO_MANIFEST,
        }
    }
}

/// Whether kubectl reports the control-plane taint as already gone
fn is_taint_not_found(stderr: &str) -> bool {
    let taint = CONTROL_PLANE_TAINT.trim_end_matches('-');
    let expected = format!("taint \"{}\" not found", taint);
    stderr.lines().any(|line| line.trim().ends_with(&expected))
}

/// kubeadm client for the local host
pub struct KubeadmClient<'a, E> {
    exec: &'a E,
    config: KubeadmConfig,
    admin_conf: PathBuf,
    host_root: PathBuf,
}

impl<'a, E: Executor> KubeadmClient<'a, E> {
    /// Create a new kubeadm client
    pub fn new(exec: &'a E, config: KubeadmConfig) -> Self {
        Self {
            exec,
            config,
            admin_conf: PathBuf::from(ADMIN_CONF),
            host_root: PathBuf::from(HOST_ROOT),
        }
    }

    /// Root that host configuration files are written beneath
    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    /// Use a different admin kubeconfig location
    #[cfg(test)]
    pub fn with_admin_conf(mut self, path: PathBuf) -> Self {
        self.admin_conf = path;
        self
    }

    /// Write host configuration files beneath `root` instead of `/`
    #[cfg(test)]
    pub fn with_host_root(mut self, root: PathBuf) -> Self {
        self.host_root = root;
        self
    }

    /// Run `kubeadm init` unless the host already has a control plane
    pub async fn init(&self, config_path: &Path) -> Result<Ensured<PathBuf>> {
        ensure(
            "kubeadm control plane",
            || async { Ok(self.admin_conf.exists().then(|| self.admin_conf.clone())) },
            || async {
                info!("Running kubeadm init (this can take several minutes)...");
                CommandBuilder::new("kubeadm")
                    .args(["init", "--config"])
                    .path_arg(config_path)
                    .context("kubeadm init failed")
                    .run_silent(self.exec)
                    .await?;
                Ok(self.admin_conf.clone())
            },
        )
        .await
    }

    /// Copy the admin kubeconfig to `target`
    pub async fn install_kubeconfig(&self, target: &Path) -> Result<()> {
        if !self.admin_conf.exists() {
            return Err(ProvisionError::guard(format!(
                "{} not found; has kubeadm init run?",
                self.admin_conf.display()
            ))
            .into());
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create kubeconfig directory")?;
        }
        tokio::fs::copy(&self.admin_conf, target)
            .await
            .with_context(|| format!("Failed to copy {}", self.admin_conf.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(target, std::fs::Permissions::from_mode(0o600))
                .await
                .context("Failed to restrict kubeconfig permissions")?;
        }

        info!("Kubeconfig written to {}", target.display());
        Ok(())
    }

    /// Allow workloads on the control plane; an already-removed taint is fine
    pub async fn untaint_control_plane(&self, kubeconfig: &Path) -> Result<()> {
        if !self.config.allow_control_plane_workloads {
            return Ok(());
        }

        let output = CommandBuilder::new("kubectl")
            .args(["taint", "nodes", "--all", CONTROL_PLANE_TAINT])
            .kubeconfig(kubeconfig)
            .context("Failed to remove control-plane taint")
            .output(self.exec)
            .await?;

        if output.success || is_taint_not_found(&output.stderr) {
            info!("Control plane accepts workloads");
            return Ok(());
        }

        Err(ProvisionError::CommandFailed {
            program: "kubectl".to_string(),
            code: output.code,
            stderr: output.stderr,
        }
        .into())
    }

    /// Apply the configured pod network manifest
    pub async fn install_network_plugin(&self, kubeconfig: &Path) -> Result<()> {
        info!("Installing {:?} pod network", self.config.network_plugin);
        ResourceManager::apply_manifest(
            self.exec,
            kubeconfig,
            self.config.network_plugin.manifest_url(),
        )
        .await
    }

    /// Wait for every node to be Ready, retrying under `policy`
    pub async fn validate(&self, kubeconfig: &Path, policy: &RetryPolicy) -> Result<u32> {
        let attempts = policy
            .run_until(|| NodeManager::all_nodes_ready(self.exec, kubeconfig))
            .await?;
        Ok(attempts)
    }

    /// Tear down the control plane on this host
    pub async fn reset(&self) -> Result<()> {
        info!("Resetting kubeadm state on this host...");
        CommandBuilder::new("kubeadm")
            .args(["reset", "-f"])
            .context("kubeadm reset failed")
            .run_silent(self.exec)
            .await?;
        info!("✓ kubeadm reset complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::utils::testing::{fail, ok, ScriptedExecutor};

    fn client<'a>(exec: &'a ScriptedExecutor, admin_conf: &Path) -> KubeadmClient<'a, ScriptedExecutor> {
        KubeadmClient::new(exec, ClusterConfig::example().kubeadm.unwrap())
            .with_admin_conf(admin_conf.to_path_buf())
    }

    #[tokio::test]
    async fn test_init_skipped_when_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let admin_conf = dir.path().join("admin.conf");
        std::fs::write(&admin_conf, "apiVersion: v1\n").unwrap();

        let exec = ScriptedExecutor::new();
        let ensured = client(&exec, &admin_conf)
            .init(Path::new("/out/kubeadm-config.yaml"))
            .await
            .unwrap();

        assert_eq!(ensured, Ensured::Existing(admin_conf));
        assert_eq!(exec.count("kubeadm init"), 0);
    }

    #[tokio::test]
    async fn test_init_runs_with_config() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ScriptedExecutor::new();

        let ensured = client(&exec, &dir.path().join("admin.conf"))
            .init(Path::new("/out/kubeadm-config.yaml"))
            .await
            .unwrap();

        assert!(ensured.was_created());
        assert_eq!(exec.calls(), vec!["kubeadm init --config /out/kubeadm-config.yaml"]);
    }

    #[tokio::test]
    async fn test_install_kubeconfig_copies_admin_conf() {
        let dir = tempfile::tempdir().unwrap();
        let admin_conf = dir.path().join("admin.conf");
        std::fs::write(&admin_conf, "apiVersion: v1\nkind: Config\n").unwrap();
        let target = dir.path().join("out").join("kubeconfig");

        let exec = ScriptedExecutor::new();
        client(&exec, &admin_conf).install_kubeconfig(&target).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "apiVersion: v1\nkind: Config\n"
        );
    }

    #[tokio::test]
    async fn test_install_kubeconfig_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ScriptedExecutor::new();
        let result = client(&exec, &dir.path().join("missing.conf"))
            .install_kubeconfig(&dir.path().join("kubeconfig"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_untaint_tolerates_missing_taint() {
        let exec = ScriptedExecutor::new().on(
            "kubectl taint",
            fail("error: taint \"node-role.kubernetes.io/control-plane\" not found"),
        );
        let result = client(&exec, Path::new("/nonexistent"))
            .untaint_control_plane(Path::new("/out/kubeconfig"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_untaint_fails_when_resource_is_missing() {
        let exec = ScriptedExecutor::new().on(
            "kubectl taint",
            fail("error: the server could not find the requested resource (get nodes) not found"),
        );
        let err = client(&exec, Path::new("/nonexistent"))
            .untaint_control_plane(Path::new("/out/kubeconfig"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::CommandFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_network_plugin_manifest() {
        let exec = ScriptedExecutor::new();
        client(&exec, Path::new("/nonexistent"))
            .install_network_plugin(Path::new("/out/kubeconfig"))
            .await
            .unwrap();
        assert_eq!(exec.calls(), vec![format!("kubectl apply -f {}", FLANNEL_MANIFEST)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_waits_for_ready_nodes() {
        let exec = ScriptedExecutor::new()
            .on("kubectl get nodes", ok("host-1=False\n"))
            .on("kubectl get nodes", ok("host-1=True\n"));

        let attempts = client(&exec, Path::new("/nonexistent"))
            .validate(Path::new("/out/kubeconfig"), &RetryPolicy::new(3, 10, "nodes"))
            .await
            .unwrap();
        assert_eq!(attempts, 2);
    }
}
