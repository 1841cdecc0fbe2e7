/// kubeadm configuration rendering
use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::KubeadmConfig;

/// File name of the rendered configuration inside the output directory
pub const KUBEADM_CONFIG_FILE: &str = "kubeadm-config.yaml";

const KUBEADM_CONFIG_TEMPLATE: &str = r#"apiVersion: kubeadm.k8s.io/v1beta3
kind: InitConfiguration
{{#if advertise_address}}
localAPIEndpoint:
  advertiseAddress: {{advertise_address}}
  bindPort: 6443
{{/if}}
nodeRegistration:
  criSocket: unix:///run/containerd/containerd.sock
---
apiVersion: kubeadm.k8s.io/v1beta3
kind: ClusterConfiguration
clusterName: {{cluster_name}}
networking:
  podSubnet: {{pod_network_cidr}}
---
apiVersion: kubelet.config.k8s.io/v1beta1
kind: KubeletConfiguration
cgroupDriver: systemd
"#;

#[derive(Serialize)]
struct TemplateData<'a> {
    cluster_name: &'a str,
    pod_network_cidr: &'a str,
    advertise_address: Option<&'a str>,
}

/// Render the kubeadm init configuration
pub fn render_kubeadm_config(cluster_name: &str, config: &KubeadmConfig) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .register_template_string("kubeadm", KUBEADM_CONFIG_TEMPLATE)
        .context("Invalid kubeadm config template")?;

    let data = TemplateData {
        cluster_name,
        pod_network_cidr: &config.pod_network_cidr,
        advertise_address: config.advertise_address.as_deref(),
    };

    handlebars
        .render("kubeadm", &data)
        .context("Failed to render kubeadm config")
}

/// Render and write `kubeadm-config.yaml` into `output_dir`
pub async fn write_kubeadm_config(
    cluster_name: &str,
    config: &KubeadmConfig,
    output_dir: &Path,
) -> Result<PathBuf> {
    let rendered = render_kubeadm_config(cluster_name, config)?;

    tokio::fs::create_dir_all(output_dir)
        .await
        .context("Failed to create output directory")?;
    let path = output_dir.join(KUBEADM_CONFIG_FILE);
    tokio::fs::write(&path, rendered)
        .await
        .context("Failed to write kubeadm config")?;

    info!("kubeadm config written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use serde::Deserialize;

    fn kubeadm_config() -> KubeadmConfig {
        ClusterConfig::example().kubeadm.unwrap()
    }

    #[test]
    fn test_render_without_advertise_address() {
        let rendered = render_kubeadm_config("lab", &kubeadm_config()).unwrap();

        assert!(rendered.contains("clusterName: lab"));
        assert!(rendered.contains("podSubnet: 10.244.0.0/16"));
        assert!(!rendered.contains("localAPIEndpoint"));

        let docs: Vec<serde_yaml::Value> = serde_yaml::Deserializer::from_str(&rendered)
            .map(serde_yaml::Value::deserialize)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[1]["kind"], "ClusterConfiguration");
    }

    #[test]
    fn test_render_with_advertise_address() {
        let mut config = kubeadm_config();
        config.advertise_address = Some("192.168.1.10".to_string());

        let rendered = render_kubeadm_config("lab", &config).unwrap();
        let first: serde_yaml::Value =
            serde_yaml::from_str(rendered.split("---").next().unwrap()).unwrap();
        assert_eq!(
            first["localAPIEndpoint"]["advertiseAddress"],
            "192.168.1.10"
        );
    }

    #[tokio::test]
    async fn test_write_kubeadm_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_kubeadm_config("lab", &kubeadm_config(), dir.path())
            .await
            .unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("clusterName: lab"));
    }
}
