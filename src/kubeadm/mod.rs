/// kubeadm cluster management on a pre-provisioned host
pub mod client;
pub mod template;

pub use client::KubeadmClient;
pub use template::{write_kubeadm_config, KUBEADM_CONFIG_FILE};
