/// Generic Kubernetes resource operations
use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::utils::command::{CommandBuilder, Executor};

/// Generic Kubernetes resource management
pub struct ResourceManager;

impl ResourceManager {
    /// Apply a manifest from a local path or URL
    pub async fn apply_manifest<E: Executor>(
        exec: &E,
        kubeconfig_path: &Path,
        manifest: &str,
    ) -> Result<()> {
        info!("Applying Kubernetes manifest: {}", manifest);

        let stdout = CommandBuilder::new("kubectl")
            .args(["apply", "-f", manifest])
            .kubeconfig(kubeconfig_path)
            .context("Failed to apply manifest")
            .run(exec)
            .await?;

        info!("{}", stdout.trim());

        Ok(())
    }
}
