/// Persisted cluster session (`NAME` / `KOPS_STATE_STORE`)
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::{ClusterConfig, Provider};

/// File name of the session, relative to the output directory
pub const SESSION_FILE: &str = "cluster.env";

/// Cluster identity handed to every kops invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub name: String,
    pub state_store: Option<String>,
}

impl Session {
    /// Derive the session from configuration
    ///
    /// Only kops clusters carry a state store; a leftover `kops` section is ignored for kubeadm.
    pub fn from_config(config: &ClusterConfig) -> Self {
        let state_store = match config.provider {
            Provider::Kops => config.kops.as_ref().map(|k| k.state_store_url()),
            Provider::Kubeadm => None,
        };
        Self {
            name: config.cluster_name.clone(),
            state_store,
        }
    }

    /// Environment variables in the order they are written
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![("NAME".to_string(), self.name.clone())];
        if let Some(store) = &self.state_store {
            vars.push(("KOPS_STATE_STORE".to_string(), store.clone()));
        }
        vars
    }

    /// Shell `export` lines suitable for `eval`
    pub fn exports(&self) -> String {
        self.env_vars()
            .into_iter()
            .map(|(k, v)| format!("export {}={}\n", k, v))
            .collect()
    }

    pub fn path(output_dir: &Path) -> PathBuf {
        output_dir.join(SESSION_FILE)
    }

    /// Write `KEY=value` lines into the output directory
    pub async fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .context("Failed to create output directory")?;

        let content: String = self
            .env_vars()
            .into_iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect();

        let path = Self::path(output_dir);
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write session file {}", path.display()))?;
        Ok(path)
    }

    /// Read a session written by [`Session::save`]
    pub async fn load(output_dir: &Path) -> Result<Self> {
        let path = Self::path(output_dir);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self> {
        let mut name = None;
        let mut state_store = None;

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some(("NAME", v)) => name = Some(v.to_string()),
                Some(("KOPS_STATE_STORE", v)) => state_store = Some(v.to_string()),
                Some(_) => {}
                None => anyhow::bail!("Malformed session line: {}", line),
            }
        }

        Ok(Self {
            name: name.context("Session file has no NAME")?,
            state_store,
        })
    }
}
