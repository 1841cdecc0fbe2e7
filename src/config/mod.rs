/// Configuration management for Kubestrap - kops and kubeadm cluster provisioning
pub mod session;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::retry::{RetryPolicy, DEFAULT_DELAY_SECS, DEFAULT_MAX_ATTEMPTS};

pub use session::Session;

/// Main cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name (kops requires a DNS-style name such as `demo.k8s.local`)
    pub cluster_name: String,

    /// Which provisioning path to take
    pub provider: Provider,

    /// Retry budget for DNS association and validation
    #[serde(default)]
    pub retry: RetryConfig,

    /// Where CLI tools are installed when missing
    #[serde(default)]
    pub tools: ToolsConfig,

    /// kops on AWS settings (required when provider is kops)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kops: Option<KopsConfig>,

    /// kubeadm single-host settings (required when provider is kubeadm)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeadm: Option<KubeadmConfig>,
}

/// Provisioning backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Kops,
    Kubeadm,
}

/// Bounded retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, at least one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts in seconds
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_secs: DEFAULT_DELAY_SECS,
        }
    }
}

impl RetryConfig {
    /// Build a retry policy for one operation
    pub fn policy(&self, description: impl Into<String>) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.delay_secs, description)
    }
}

/// Tool installation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory downloaded binaries are written to
    #[serde(default = "default_install_dir")]
    pub install_dir: String,

    /// Pinned kops version (e.g., "v1.29.0"); latest release when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kops_version: Option<String>,

    /// Pinned kubectl version (e.g., "v1.30.2"); current stable when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubectl_version: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            kops_version: None,
            kubectl_version: None,
        }
    }
}

impl ToolsConfig {
    pub fn install_dir(&self) -> PathBuf {
        expand_home(&self.install_dir)
    }
}

/// kops on AWS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KopsConfig {
    /// AWS region (e.g., "us-east-1")
    pub region: String,

    /// Availability zones for nodes and masters
    pub zones: Vec<String>,

    /// S3 bucket holding the kops state store
    pub state_bucket: String,

    /// Number of worker nodes
    #[serde(default = "default_node_count")]
    pub node_count: u32,

    /// EC2 instance type for workers
    pub node_size: String,

    /// EC2 instance type for the control plane
    #[serde(alias = "master_size")]
    pub control_plane_size: String,

    /// CNI passed to `kops create cluster --networking`
    #[serde(default = "default_kops_networking")]
    pub networking: String,

    /// Private Route53 zone to attach to the cluster VPC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_zone: Option<String>,

    /// Public key handed to kops; generated when missing
    #[serde(default = "default_ssh_public_key")]
    pub ssh_public_key: String,

    /// Duration passed to `kops validate cluster --wait`
    #[serde(default = "default_validate_wait")]
    pub validate_wait: String,

    /// Kubernetes version for kops; kops' default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    /// Remove the state store bucket on destroy
    #[serde(default)]
    pub delete_state_store: bool,
}

impl KopsConfig {
    /// `s3://` URL of the state store
    pub fn state_store_url(&self) -> String {
        format!("s3://{}", self.state_bucket)
    }

    pub fn ssh_public_key_path(&self) -> PathBuf {
        expand_home(&self.ssh_public_key)
    }
}

/// CNI plugin for kubeadm clusters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPlugin {
    Flannel,
    Calico,
}

/// kubeadm configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeadmConfig {
    /// Pod network CIDR (must match the network plugin's expectation)
    #[serde(default = "default_pod_network_cidr")]
    pub pod_network_cidr: String,

    /// Pod network plugin
    #[serde(default = "default_network_plugin")]
    pub network_plugin: NetworkPlugin,

    /// Kubernetes minor version used for the package repository (e.g., "1.30")
    pub kubernetes_version: String,

    /// API server advertise address; kubeadm picks the default route when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_address: Option<String>,

    /// Remove the control-plane taint so workloads can run on a single host
    #[serde(default = "default_true")]
    pub allow_control_plane_workloads: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_delay_secs() -> u64 {
    DEFAULT_DELAY_SECS
}

fn default_install_dir() -> String {
    "~/.local/bin".to_string()
}

fn default_node_count() -> u32 {
    2
}

fn default_kops_networking() -> String {
    "calico".to_string()
}

fn default_ssh_public_key() -> String {
    "~/.ssh/id_rsa.pub".to_string()
}

fn default_validate_wait() -> String {
    "10m".to_string()
}

fn default_pod_network_cidr() -> String {
    "10.244.0.0/16".to_string()
}

fn default_network_plugin() -> NetworkPlugin {
    NetworkPlugin::Flannel
}

/// Expand a leading `~/` using `HOME`
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

impl ClusterConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClusterConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cluster_name.is_empty() {
            anyhow::bail!("cluster_name cannot be empty");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }

        match self.provider {
            Provider::Kops => {
                let kops = self
                    .kops
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("provider is kops but no kops section given"))?;
                if kops.zones.is_empty() {
                    anyhow::bail!("kops.zones must list at least one availability zone");
                }
                validate_bucket_name(&kops.state_bucket)?;
            }
            Provider::Kubeadm => {
                let kubeadm = self.kubeadm.as_ref().ok_or_else(|| {
                    anyhow::anyhow!("provider is kubeadm but no kubeadm section given")
                })?;
                validate_cidr(&kubeadm.pod_network_cidr)?;
            }
        }

        Ok(())
    }

    /// kops settings, failing when this is not a kops cluster
    pub fn kops(&self) -> anyhow::Result<&KopsConfig> {
        self.kops
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No kops section in configuration"))
    }

    /// kubeadm settings, failing when this is not a kubeadm cluster
    pub fn kubeadm(&self) -> anyhow::Result<&KubeadmConfig> {
        self.kubeadm
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No kubeadm section in configuration"))
    }

    /// Generate an example configuration file
    pub fn example() -> Self {
        Self {
            cluster_name: "demo.k8s.local".to_string(),
            provider: Provider::Kops,
            retry: RetryConfig::default(),
            tools: ToolsConfig::default(),
            kops: Some(KopsConfig {
                region: "us-east-1".to_string(),
                zones: vec!["us-east-1a".to_string()],
                state_bucket: "demo-kops-state-store".to_string(),
                node_count: 2,
                node_size: "t3.medium".to_string(),
                control_plane_size: "t3.medium".to_string(),
                networking: default_kops_networking(),
                dns_zone: Some("demo.internal".to_string()),
                ssh_public_key: default_ssh_public_key(),
                validate_wait: default_validate_wait(),
                kubernetes_version: None,
                delete_state_store: false,
            }),
            kubeadm: Some(KubeadmConfig {
                pod_network_cidr: default_pod_network_cidr(),
                network_plugin: NetworkPlugin::Flannel,
                kubernetes_version: "1.30".to_string(),
                advertise_address: None,
                allow_control_plane_workloads: true,
            }),
        }
    }
}

/// Validate CIDR notation
fn validate_cidr(cidr: &str) -> anyhow::Result<()> {
    if !cidr.contains('/') {
        anyhow::bail!("Invalid CIDR notation: {}", cidr);
    }
    Ok(())
}

/// Validate an S3 bucket name
fn validate_bucket_name(name: &str) -> anyhow::Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let valid_edges = name
        .chars()
        .next()
        .zip(name.chars().last())
        .map(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric())
        .unwrap_or(false);

    if !(3..=63).contains(&name.len()) || !valid_chars || !valid_edges {
        anyhow::bail!("Invalid S3 bucket name: {}", name);
    }
    Ok(())
}
