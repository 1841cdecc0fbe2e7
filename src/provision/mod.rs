/// Provisioning flows: each command builds a pipeline over the managers
pub mod kops;
pub mod kubeadm;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{ClusterConfig, Session};
use crate::utils::command::Executor;

/// File the last pipeline report is written to, relative to the output directory
pub const RUN_REPORT_FILE: &str = "last-run.json";

/// Everything a provisioning flow needs for one invocation
pub struct Workspace<'a, E> {
    pub exec: &'a E,
    pub config: &'a ClusterConfig,
    pub output_dir: &'a Path,
}

impl<'a, E: Executor> Workspace<'a, E> {
    /// Create a new workspace
    pub fn new(exec: &'a E, config: &'a ClusterConfig, output_dir: &'a Path) -> Self {
        Self {
            exec,
            config,
            output_dir,
        }
    }

    pub fn session(&self) -> Session {
        Session::from_config(self.config)
    }

    pub fn kubeconfig_path(&self) -> PathBuf {
        self.output_dir.join("kubeconfig")
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(RUN_REPORT_FILE)
    }
}

/// Remove the session file after a teardown; absence is fine
pub async fn remove_session<E: Executor>(ws: &Workspace<'_, E>) -> Result<()> {
    let path = Session::path(ws.output_dir);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            info!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
