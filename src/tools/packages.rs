/// Host package installation for kubeadm nodes (apt or yum)
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ProvisionError;
use crate::utils::command::{tool_available, CommandBuilder, CommandSpec, Executor};

/// Kubernetes node packages, held at the installed version
const KUBE_PACKAGES: [&str; 3] = ["kubelet", "kubeadm", "kubectl"];

const APT_KEYRING: &str = "/etc/apt/keyrings/kubernetes-apt-keyring.gpg";
const APT_SOURCE_LIST: &str = "/etc/apt/sources.list.d/kubernetes.list";
const YUM_REPO_FILE: &str = "/etc/yum.repos.d/kubernetes.repo";
const MODULES_FILE: &str = "/etc/modules-load.d/k8s.conf";
const SYSCTL_FILE: &str = "/etc/sysctl.d/k8s.conf";

/// Supported host package managers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Yum,
}

impl PackageManager {
    /// Detect the host's package manager
    pub async fn detect<E: Executor>(exec: &E) -> Result<Self> {
        if tool_available(exec, "apt-get", &["--version"]).await {
            Ok(Self::Apt)
        } else if tool_available(exec, "yum", &["--version"]).await {
            Ok(Self::Yum)
        } else {
            Err(ProvisionError::guard("Neither apt-get nor yum found; unsupported host").into())
        }
    }
}

/// One step of host preparation
#[derive(Debug, Clone)]
pub enum HostAction {
    Run(CommandSpec),
    WriteFile { path: PathBuf, content: String },
}

fn run(builder: CommandBuilder) -> HostAction {
    HostAction::Run(builder.spec().clone())
}

fn write(path: &str, content: String) -> HostAction {
    HostAction::WriteFile {
        path: PathBuf::from(path),
        content,
    }
}

/// pkgs.k8s.io repository for a minor version, e.g. `1.30`
fn repo_base(kubernetes_version: &str) -> String {
    let minor = kubernetes_version.trim().trim_start_matches('v');
    format!("https://pkgs.k8s.io/core:/stable:/v{}", minor)
}

/// Ordered host preparation for a kubeadm control plane
pub fn install_plan(manager: PackageManager, kubernetes_version: &str) -> Vec<HostAction> {
    let repo = repo_base(kubernetes_version);

    let mut plan = vec![
        run(CommandBuilder::new("swapoff").arg("-a")),
        write(MODULES_FILE, "overlay\nbr_netfilter\n".to_string()),
        run(CommandBuilder::new("modprobe").arg("overlay")),
        run(CommandBuilder::new("modprobe").arg("br_netfilter")),
        write(
            SYSCTL_FILE,
            "net.bridge.bridge-nf-call-iptables = 1\nnet.bridge.bridge-nf-call-ip6tables = 1\nnet.ipv4.ip_forward = 1\n"
                .to_string(),
        ),
        run(CommandBuilder::new("sysctl").arg("--system")),
    ];

    match manager {
        PackageManager::Apt => {
            plan.extend([
                run(CommandBuilder::new("apt-get").arg("update")),
                run(CommandBuilder::new("apt-get").args([
                    "install",
                    "-y",
                    "apt-transport-https",
                    "ca-certificates",
                    "curl",
                    "gpg",
                    "containerd",
                ])),
                run(CommandBuilder::new("mkdir").args(["-p", "-m", "755", "/etc/apt/keyrings"])),
                run(CommandBuilder::new("sh").args([
                    "-c".to_string(),
                    format!(
                        "curl -fsSL {}/deb/Release.key | gpg --batch --yes --dearmor -o {}",
                        repo, APT_KEYRING
                    ),
                ])),
                write(
                    APT_SOURCE_LIST,
                    format!("deb [signed-by={}] {}/deb/ /\n", APT_KEYRING, repo),
                ),
                run(CommandBuilder::new("apt-get").arg("update")),
                run(CommandBuilder::new("apt-get")
                    .args(["install", "-y"])
                    .args(KUBE_PACKAGES)),
                run(CommandBuilder::new("apt-mark").arg("hold").args(KUBE_PACKAGES)),
            ]);
        }
        PackageManager::Yum => {
            plan.extend([
                write(
                    YUM_REPO_FILE,
                    format!(
                        "[kubernetes]\nname=Kubernetes\nbaseurl={repo}/rpm/\nenabled=1\ngpgcheck=1\ngpgkey={repo}/rpm/repodata/repomd.xml.key\nexclude=kubelet kubeadm kubectl cri-tools kubernetes-cni\n"
                    ),
                ),
                run(CommandBuilder::new("yum")
                    .args(["install", "-y"])
                    .args(KUBE_PACKAGES)
                    .args(["containerd", "--disableexcludes=kubernetes"])),
            ]);
        }
    }

    plan.push(run(CommandBuilder::new("systemctl").args([
        "enable",
        "--now",
        "containerd",
        "kubelet",
    ])));

    plan
}

/// Apply a plan in order, stopping at the first failure
///
/// File paths in the plan are absolute and are written beneath `root`, which is `/` on a real host.
pub async fn apply_plan<E: Executor>(exec: &E, plan: &[HostAction], root: &Path) -> Result<()> {
    for action in plan {
        match action {
            HostAction::Run(spec) => {
                info!("$ {}", spec.display());
                CommandBuilder::new(spec.program.clone())
                    .args(spec.args.iter().cloned())
                    .envs(spec.env.iter().cloned())
                    .context(format!("Host preparation failed: {}", spec.display()))
                    .run_silent(exec)
                    .await?;
            }
            HostAction::WriteFile { path, content } => {
                let path = root.join(path.strip_prefix("/").unwrap_or(path));
                info!("Writing {}", path.display());
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                tokio::fs::write(&path, content)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::{fail, ScriptedExecutor};

    fn commands(plan: &[HostAction]) -> Vec<String> {
        plan.iter()
            .filter_map(|a| match a {
                HostAction::Run(spec) => Some(spec.display()),
                HostAction::WriteFile { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_detect_prefers_apt() {
        let exec = ScriptedExecutor::new();
        assert_eq!(PackageManager::detect(&exec).await.unwrap(), PackageManager::Apt);

        let exec = ScriptedExecutor::new().on("apt-get", fail("not found"));
        assert_eq!(PackageManager::detect(&exec).await.unwrap(), PackageManager::Yum);

        let exec = ScriptedExecutor::new()
            .on("apt-get", fail("not found"))
            .on("yum", fail("not found"));
        assert!(PackageManager::detect(&exec).await.is_err());
    }

    #[test]
    fn test_apt_plan() {
        let plan = install_plan(PackageManager::Apt, "1.30");
        let cmds = commands(&plan);

        assert_eq!(cmds.first().map(String::as_str), Some("swapoff -a"));
        assert!(cmds.contains(&"apt-get install -y kubelet kubeadm kubectl".to_string()));
        assert!(cmds.contains(&"apt-mark hold kubelet kubeadm kubectl".to_string()));
        assert_eq!(
            cmds.last().map(String::as_str),
            Some("systemctl enable --now containerd kubelet")
        );

        let source = plan.iter().find_map(|a| match a {
            HostAction::WriteFile { path, content } if path.ends_with("kubernetes.list") => {
                Some(content.clone())
            }
            _ => None,
        });
        assert_eq!(
            source.as_deref(),
            Some("deb [signed-by=/etc/apt/keyrings/kubernetes-apt-keyring.gpg] https://pkgs.k8s.io/core:/stable:/v1.30/deb/ /\n")
        );
    }

    #[test]
    fn test_yum_plan() {
        let plan = install_plan(PackageManager::Yum, "v1.29");
        let cmds = commands(&plan);
        assert!(cmds.contains(
            &"yum install -y kubelet kubeadm kubectl containerd --disableexcludes=kubernetes"
                .to_string()
        ));
        assert!(cmds.iter().all(|c| !c.starts_with("apt-get")));

        let repo = plan.iter().find_map(|a| match a {
            HostAction::WriteFile { path, content } if path.ends_with("kubernetes.repo") => {
                Some(content.clone())
            }
            _ => None,
        });
        assert!(repo.unwrap().contains("baseurl=https://pkgs.k8s.io/core:/stable:/v1.29/rpm/"));
    }

    #[tokio::test]
    async fn test_apply_plan_stops_at_failure() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("after");
        let plan = vec![
            HostAction::Run(CommandBuilder::new("apt-get").arg("update").spec().clone()),
            HostAction::Run(CommandBuilder::new("apt-get").arg("install").spec().clone()),
            HostAction::WriteFile {
                path: marker.clone(),
                content: "x".to_string(),
            },
        ];
        let exec = ScriptedExecutor::new()
            .on("apt-get update", fail("Temporary failure resolving"));

        assert!(apply_plan(&exec, &plan, Path::new("/")).await.is_err());
        assert_eq!(exec.calls(), vec!["apt-get update"]);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_apply_plan_writes_beneath_root() {
        let dir = tempfile::tempdir().unwrap();
        let plan = vec![HostAction::WriteFile {
            path: PathBuf::from(SYSCTL_FILE),
            content: "net.ipv4.ip_forward = 1\n".to_string(),
        }];
        let exec = ScriptedExecutor::new();

        apply_plan(&exec, &plan, dir.path()).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("etc/sysctl.d/k8s.conf")).unwrap();
        assert_eq!(written, "net.ipv4.ip_forward = 1\n");
    }
}
