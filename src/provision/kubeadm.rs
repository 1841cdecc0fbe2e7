/// kubeadm on the local host: create, validate, destroy and status flows
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use super::{remove_session, Workspace};
use crate::k8s::{KubernetesClient, NodeManager};
use crate::kubeadm::{write_kubeadm_config, KubeadmClient};
use crate::pipeline::{Pipeline, RunReport};
use crate::tools::packages::{apply_plan, install_plan};
use crate::tools::PackageManager;
use crate::utils::command::{tool_available, Executor};
use crate::utils::idempotent::{ensure, Ensured};

/// Install kubelet, kubeadm, kubectl and containerd unless kubeadm already runs
async fn install_packages<E: Executor>(
    exec: &E,
    kubernetes_version: &str,
    host_root: &Path,
) -> Result<Ensured<()>> {
    ensure(
        "kubeadm packages",
        || async {
            Ok(tool_available(exec, "kubeadm", &["version"])
                .await
                .then_some(()))
        },
        || async {
            let manager = PackageManager::detect(exec).await?;
            info!("Preparing host with {:?}", manager);
            apply_plan(exec, &install_plan(manager, kubernetes_version), host_root).await
        },
    )
    .await
}

/// Prepare the host packages only
pub async fn install_tools<E: Executor>(ws: &Workspace<'_, E>) -> Result<()> {
    let kubeadm_config = ws.config.kubeadm()?;
    let client = KubeadmClient::new(ws.exec, kubeadm_config.clone());
    let ensured = install_packages(ws.exec, &kubeadm_config.kubernetes_version, client.host_root()).await?;
    if !ensured.was_created() {
        info!("✓ kubeadm already installed");
    }
    Ok(())
}

/// Provision a single-node kubeadm control plane on this host
pub async fn create<E: Executor>(ws: &Workspace<'_, E>) -> Result<RunReport> {
    let client = KubeadmClient::new(ws.exec, ws.config.kubeadm()?.clone());
    create_with(ws, &client).await
}

async fn create_with<E: Executor>(ws: &Workspace<'_, E>, client: &KubeadmClient<'_, E>) -> Result<RunReport> {
    let kubeadm_config = ws.config.kubeadm()?;
    let session = ws.session();
    let kubeconfig = ws.kubeconfig_path();
    let retry = &ws.config.retry;

    let report = Pipeline::new(format!("create kubeadm cluster {}", session.name))
        .step("Install packages", async {
            install_packages(ws.exec, &kubeadm_config.kubernetes_version, client.host_root())
                .await
                .map(|_| ())
        })
        .step("Persist session", async { session.save(ws.output_dir).await.map(|_| ()) })
        .step("Render kubeadm config", async {
            write_kubeadm_config(&session.name, kubeadm_config, ws.output_dir)
                .await
                .map(|_| ())
        })
        .step("Initialize control plane", async {
            let config_path = ws.output_dir.join(crate::kubeadm::KUBEADM_CONFIG_FILE);
            client.init(&config_path).await.map(|_| ())
        })
        .step("Install kubeconfig", client.install_kubeconfig(&kubeconfig))
        .step("Allow control-plane workloads", client.untaint_control_plane(&kubeconfig))
        .step("Install pod network", client.install_network_plugin(&kubeconfig))
        .step("Validate nodes", async {
            client
                .validate(&kubeconfig, &retry.policy("Waiting for nodes to be Ready"))
                .await
                .map(|_| ())
        })
        .run_and_record(&ws.report_path())
        .await?;

    info!("✓ Cluster {} is ready", session.name);
    info!("  export KUBECONFIG={}", kubeconfig.display());
    info!("  kubectl get nodes");

    Ok(report)
}

/// Wait for every node of an existing cluster to be Ready
pub async fn validate<E: Executor>(ws: &Workspace<'_, E>) -> Result<()> {
    KubernetesClient::check_kubectl_installed(ws.exec).await?;

    let client = KubeadmClient::new(ws.exec, ws.config.kubeadm()?.clone());
    let attempts = client
        .validate(
            &ws.kubeconfig_path(),
            &ws.config.retry.policy("Waiting for nodes to be Ready"),
        )
        .await?;
    info!("✓ All nodes Ready after {} attempt(s)", attempts);
    Ok(())
}

/// Reset the control plane after `confirm` approves
pub async fn destroy<E, C>(ws: &Workspace<'_, E>, confirm: C) -> Result<RunReport>
where
    E: Executor,
    C: FnOnce(&str) -> Result<()>,
{
    let client = KubeadmClient::new(ws.exec, ws.config.kubeadm()?.clone());
    destroy_with(ws, &client, confirm).await
}

async fn destroy_with<E, C>(ws: &Workspace<'_, E>, client: &KubeadmClient<'_, E>, confirm: C) -> Result<RunReport>
where
    E: Executor,
    C: FnOnce(&str) -> Result<()>,
{
    confirm(&format!(
        "This will run kubeadm reset and remove cluster {} from this host.",
        ws.config.cluster_name
    ))?;

    let kubeconfig = ws.kubeconfig_path();

    Pipeline::new(format!("destroy kubeadm cluster {}", ws.config.cluster_name))
        .step("Reset control plane", client.reset())
        .step("Remove kubeconfig", async {
            match tokio::fs::remove_file(&kubeconfig).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e).with_context(|| format!("Failed to remove {}", kubeconfig.display())),
            }
        })
        .step("Remove session", remove_session(ws))
        .run_and_record(&ws.report_path())
        .await
}

/// Report node readiness without changing anything
pub async fn status<E: Executor>(ws: &Workspace<'_, E>) -> Result<()> {
    let kubeconfig = ws.kubeconfig_path();
    info!("Cluster: {}", ws.config.cluster_name);

    if !kubeconfig.exists() {
        info!("  No kubeconfig at {}; cluster not created yet", kubeconfig.display());
        return Ok(());
    }

    match NodeManager::list_nodes(ws.exec, &kubeconfig).await {
        Ok(nodes) if nodes.is_empty() => info!("  No nodes registered"),
        Ok(nodes) => {
            for node in nodes {
                info!(
                    "  {} {}",
                    node.name,
                    if node.ready { "Ready" } else { "NotReady" }
                );
            }
        }
        Err(e) => warn!("Could not reach the API server: {:#}", e),
    }

    Ok(())
}
