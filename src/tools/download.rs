/// Binary downloads for kops and kubectl
use anyhow::{Context, Result};
use reqwest::{header, Client};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

use crate::error::ProvisionError;
use crate::utils::command::{tool_available, Executor};
use crate::utils::idempotent::{ensure, Ensured};

const KOPS_LATEST_RELEASE: &str = "https://api.github.com/repos/kubernetes/kops/releases/latest";
const KOPS_DOWNLOAD_BASE: &str = "https://github.com/kubernetes/kops/releases/download/";
const KUBECTL_STABLE: &str = "https://dl.k8s.io/release/stable.txt";
const KUBECTL_DOWNLOAD_BASE: &str = "https://dl.k8s.io/release/";

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
}

/// Release architecture name for the running machine
pub fn release_arch() -> Result<&'static str> {
    match std::env::consts::ARCH {
        "x86_64" => Ok("amd64"),
        "aarch64" => Ok("arm64"),
        other => Err(ProvisionError::guard(format!("Unsupported architecture: {}", other)).into()),
    }
}

/// Prefix `v` if the version lacks it
fn normalize_version(version: &str) -> String {
    let version = version.trim();
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{}", version)
    }
}

/// `.../kops/releases/download/<version>/kops-linux-<arch>`
pub fn kops_download_url(version: &str, arch: &str) -> Result<Url> {
    let path = format!("{}/kops-linux-{}", normalize_version(version), arch);
    Url::parse(KOPS_DOWNLOAD_BASE)?
        .join(&path)
        .context("Invalid kops download URL")
}

/// `.../release/<version>/bin/linux/<arch>/kubectl`
pub fn kubectl_download_url(version: &str, arch: &str) -> Result<Url> {
    let path = format!("{}/bin/linux/{}/kubectl", normalize_version(version), arch);
    Url::parse(KUBECTL_DOWNLOAD_BASE)?
        .join(&path)
        .context("Invalid kubectl download URL")
}

/// Downloads missing CLIs into an install directory
pub struct ToolInstaller {
    client: Client,
    install_dir: PathBuf,
}

impl ToolInstaller {
    /// Create a new tool installer
    pub fn new(install_dir: PathBuf) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        // GitHub's API rejects requests without a User-Agent
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(concat!("kubestrap/", env!("CARGO_PKG_VERSION"))),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            install_dir,
        })
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Latest kops release tag
    pub async fn latest_kops_version(&self) -> Result<String> {
        debug!("GET {}", KOPS_LATEST_RELEASE);
        let release: GitHubRelease = self
            .client
            .get(KOPS_LATEST_RELEASE)
            .send()
            .await
            .context("Failed to query latest kops release")?
            .error_for_status()
            .context("GitHub API rejected kops release query")?
            .json()
            .await
            .context("Failed to parse kops release")?;

        Ok(release.tag_name)
    }

    /// Current stable kubectl version
    pub async fn stable_kubectl_version(&self) -> Result<String> {
        debug!("GET {}", KUBECTL_STABLE);
        let version = self
            .client
            .get(KUBECTL_STABLE)
            .send()
            .await
            .context("Failed to query stable kubectl version")?
            .error_for_status()
            .context("Stable kubectl version query rejected")?
            .text()
            .await
            .context("Failed to read stable kubectl version")?;

        Ok(version.trim().to_string())
    }

    /// Download `url` to `<install_dir>/<name>` and mark it executable
    ///
    /// Any failure is a guard failure; a partial file is removed.
    pub async fn download(&self, url: &Url, name: &str) -> Result<PathBuf> {
        let target = self.install_dir.join(name);
        info!("Downloading {} from {}", name, url);

        let bytes = match self.fetch(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Err(ProvisionError::guard(format!(
                    "Failed to download {} from {}: {:#}",
                    name, url, e
                ))
                .into())
            }
        };

        tokio::fs::create_dir_all(&self.install_dir)
            .await
            .context("Failed to create install directory")?;

        if let Err(e) = write_executable(&target, &bytes).await {
            let _ = tokio::fs::remove_file(&target).await;
            return Err(e);
        }

        info!("✓ Installed {} to {}", name, target.display());
        Ok(target)
    }

    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    /// Install kops unless it already runs
    pub async fn ensure_kops<E: Executor>(
        &self,
        exec: &E,
        pinned: Option<&str>,
    ) -> Result<Ensured<String>> {
        ensure(
            "kops CLI",
            || async {
                Ok(tool_available(exec, "kops", &["version"])
                    .await
                    .then(|| "kops".to_string()))
            },
            || async {
                let version = match pinned {
                    Some(v) => v.to_string(),
                    None => self.latest_kops_version().await?,
                };
                let url = kops_download_url(&version, release_arch()?)?;
                let path = self.download(&url, "kops").await?;
                Ok(path.display().to_string())
            },
        )
        .await
    }

    /// Install kubectl unless it already runs
    pub async fn ensure_kubectl<E: Executor>(
        &self,
        exec: &E,
        pinned: Option<&str>,
    ) -> Result<Ensured<String>> {
        ensure(
            "kubectl CLI",
            || async {
                Ok(tool_available(exec, "kubectl", &["version", "--client"])
                    .await
                    .then(|| "kubectl".to_string()))
            },
            || async {
                let version = match pinned {
                    Some(v) => v.to_string(),
                    None => self.stable_kubectl_version().await?,
                };
                let url = kubectl_download_url(&version, release_arch()?)?;
                let path = self.download(&url, "kubectl").await?;
                Ok(path.display().to_string())
            },
        )
        .await
    }
}

async fn write_executable(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .await
            .with_context(|| format!("Failed to mark {} executable", path.display()))?;
    }

    Ok(())
}
