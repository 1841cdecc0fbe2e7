/// Kubernetes operations client
use anyhow::Result;

use crate::utils::command::{check_tool_installed, Executor};

/// Kubernetes client for kubectl operations
pub struct KubernetesClient;

impl KubernetesClient {
    /// Check if kubectl is installed
    pub async fn check_kubectl_installed<E: Executor>(exec: &E) -> Result<()> {
        check_tool_installed(
            exec,
            "kubectl",
            &["version", "--client"],
            "Run `kubestrap install-tools` or see https://kubernetes.io/docs/tasks/tools/",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::{fail, ScriptedExecutor};

    #[tokio::test]
    async fn test_check_kubectl() {
        let exec = ScriptedExecutor::new();
        assert!(KubernetesClient::check_kubectl_installed(&exec).await.is_ok());

        let exec = ScriptedExecutor::new().on("kubectl version", fail("command not found"));
        let err = KubernetesClient::check_kubectl_installed(&exec)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("kubectl is not installed"));
    }
}
