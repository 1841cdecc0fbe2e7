/// Kubernetes node operations
use anyhow::Result;
use std::path::Path;
use tracing::{debug, info};

use crate::utils::command::{CommandBuilder, Executor};

/// Name and Ready condition of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub name: String,
    pub ready: bool,
}

const NODE_READY_JSONPATH: &str = r#"jsonpath={range .items[*]}{.metadata.name}{"="}{.status.conditions[?(@.type=="Ready")].status}{"\n"}{end}"#;

/// Parse `name=True` lines produced by [`NODE_READY_JSONPATH`]
fn parse_node_statuses(stdout: &str) -> Vec<NodeStatus> {
    stdout
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .map(|(name, status)| NodeStatus {
            name: name.to_string(),
            ready: status.trim().eq_ignore_ascii_case("true"),
        })
        .collect()
}

/// Kubernetes node management operations
pub struct NodeManager;

impl NodeManager {
    /// List every node with its Ready condition
    pub async fn list_nodes<E: Executor>(exec: &E, kubeconfig_path: &Path) -> Result<Vec<NodeStatus>> {
        let stdout = CommandBuilder::new("kubectl")
            .args(["get", "nodes", "-o", NODE_READY_JSONPATH])
            .kubeconfig(kubeconfig_path)
            .context("Failed to get nodes")
            .run(exec)
            .await?;

        Ok(parse_node_statuses(&stdout))
    }

    /// Single check: at least one node exists and every node is Ready
    pub async fn all_nodes_ready<E: Executor>(exec: &E, kubeconfig_path: &Path) -> Result<bool> {
        let nodes = Self::list_nodes(exec, kubeconfig_path).await?;

        if nodes.is_empty() {
            debug!("No nodes registered yet");
            return Ok(false);
        }

        let not_ready: Vec<&str> = nodes
            .iter()
            .filter(|n| !n.ready)
            .map(|n| n.name.as_str())
            .collect();

        if not_ready.is_empty() {
            info!("✓ All {} nodes are Ready", nodes.len());
            Ok(true)
        } else {
            info!("Nodes not Ready yet: {}", not_ready.join(", "));
            Ok(false)
        }
    }
}
