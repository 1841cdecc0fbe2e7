/// kops on AWS: create, validate, destroy and status flows
use anyhow::Result;
use tracing::info;

use super::{remove_session, Workspace};
use crate::aws::{AwsClient, HostedZoneManager, StateStoreManager, VpcManager};
use crate::config::RetryConfig;
use crate::kops::ssh_key::ensure_ssh_key;
use crate::kops::KopsClient;
use crate::pipeline::{Pipeline, RunReport};
use crate::tools::ToolInstaller;
use crate::utils::command::{check_tool_installed, Executor};

/// Make sure kops, kubectl and the AWS CLI are usable
pub async fn install_tools<E: Executor>(ws: &Workspace<'_, E>, installer: &ToolInstaller) -> Result<()> {
    let tools = &ws.config.tools;
    installer
        .ensure_kubectl(ws.exec, tools.kubectl_version.as_deref())
        .await?;
    installer
        .ensure_kops(ws.exec, tools.kops_version.as_deref())
        .await?;
    check_tool_installed(
        ws.exec,
        "aws",
        &["--version"],
        "See https://docs.aws.amazon.com/cli/latest/userguide/getting-started-install.html",
    )
    .await
}

/// Look up the cluster VPC, ensure the private zone and associate the two
async fn attach_private_dns<E: Executor>(
    aws: AwsClient<'_, E>,
    cluster_name: &str,
    dns_zone: &str,
    retry: &RetryConfig,
) -> Result<()> {
    let vpc = VpcManager::new(aws.clone())
        .require_cluster_vpc(cluster_name)
        .await?;

    let zones = HostedZoneManager::new(aws);
    let zone_id = zones
        .ensure_private_zone(dns_zone, &vpc.vpc_id)
        .await?
        .into_inner();

    let policy = retry.policy(format!("Associating {} with hosted zone {}", vpc.vpc_id, dns_zone));
    zones.associate_vpc(&zone_id, &vpc.vpc_id, &policy).await?;

    info!("✓ Private DNS zone {} ({}) attached to {}", dns_zone, zone_id, vpc.vpc_id);
    Ok(())
}

/// Provision a kops cluster end to end
pub async fn create<E: Executor>(ws: &Workspace<'_, E>, installer: &ToolInstaller) -> Result<RunReport> {
    let kops_config = ws.config.kops()?;
    let session = ws.session();
    let aws = AwsClient::new(ws.exec, kops_config.region.clone());
    let state_store = StateStoreManager::new(aws.clone());
    let kops = KopsClient::new(ws.exec, session.clone(), kops_config.clone());
    let ssh_key = kops_config.ssh_public_key_path();
    let kubeconfig = ws.kubeconfig_path();
    let retry = &ws.config.retry;

    let mut pipeline = Pipeline::new(format!("create kops cluster {}", session.name))
        .step("Install tools", install_tools(ws, installer))
        .step("Persist session", async {
            let path = session.save(ws.output_dir).await?;
            info!("Session written to {} (eval \"$(kubestrap env)\" to load it)", path.display());
            Ok(())
        })
        .step("Ensure state store", async {
            state_store
                .ensure_state_store(&kops_config.state_bucket)
                .await
                .map(|_| ())
        })
        .step("Ensure SSH key", async {
            ensure_ssh_key(ws.exec, &ssh_key).await.map(|_| ())
        })
        .step("Create cluster spec", async {
            kops.ensure_cluster(&ssh_key).await.map(|_| ())
        })
        .step("Apply cluster", kops.update_cluster())
        .step("Export kubeconfig", kops.export_kubeconfig(&kubeconfig));

    if let Some(dns_zone) = &kops_config.dns_zone {
        pipeline = pipeline.step(
            "Attach private DNS",
            attach_private_dns(aws.clone(), &session.name, dns_zone, retry),
        );
    }

    let pipeline = pipeline.step("Validate cluster", async {
        kops.validate(&retry.policy("Validating cluster"))
            .await
            .map(|_| ())
    });

    let report = pipeline.run_and_record(&ws.report_path()).await?;

    info!("✓ Cluster {} is ready", session.name);
    info!("  export KUBECONFIG={}", kubeconfig.display());
    info!("  kubectl get nodes");

    Ok(report)
}

/// Validate an existing kops cluster
pub async fn validate<E: Executor>(ws: &Workspace<'_, E>) -> Result<()> {
    let kops = KopsClient::new(ws.exec, ws.session(), ws.config.kops()?.clone());
    let attempts = kops
        .validate(&ws.config.retry.policy("Validating cluster"))
        .await?;
    info!("✓ Cluster valid after {} attempt(s)", attempts);
    Ok(())
}

/// Tear down a kops cluster after `confirm` approves
///
/// Nothing external is touched before confirmation.
pub async fn destroy<E, C>(ws: &Workspace<'_, E>, confirm: C) -> Result<RunReport>
where
    E: Executor,
    C: FnOnce(&str) -> Result<()>,
{
    let kops_config = ws.config.kops()?;
    let session = ws.session();

    confirm(&format!(
        "This will permanently delete kops cluster {} and its AWS resources.",
        session.name
    ))?;

    let aws = AwsClient::new(ws.exec, kops_config.region.clone());
    let kops = KopsClient::new(ws.exec, session.clone(), kops_config.clone());
    let zones = HostedZoneManager::new(aws.clone());
    let state_store = StateStoreManager::new(aws);

    let mut pipeline =
        Pipeline::new(format!("destroy kops cluster {}", session.name)).step("Delete cluster", kops.delete_cluster());

    if let Some(dns_zone) = &kops_config.dns_zone {
        pipeline = pipeline.step("Delete hosted zone", zones.delete_zone(dns_zone));
    }

    if kops_config.delete_state_store {
        pipeline = pipeline.step(
            "Delete state store",
            state_store.delete_state_store(&kops_config.state_bucket),
        );
    }

    let pipeline = pipeline.step("Remove session", remove_session(ws));
    pipeline.run_and_record(&ws.report_path()).await
}

/// Report what exists without changing anything
pub async fn status<E: Executor>(ws: &Workspace<'_, E>) -> Result<()> {
    let kops_config = ws.config.kops()?;
    let aws = AwsClient::new(ws.exec, kops_config.region.clone());

    info!("Cluster: {}", ws.config.cluster_name);

    let bucket_exists = StateStoreManager::new(aws.clone())
        .bucket_exists(&kops_config.state_bucket)
        .await?;
    info!(
        "  State store: {} ({})",
        kops_config.state_store_url(),
        if bucket_exists { "present" } else { "absent" }
    );
    if !bucket_exists {
        return Ok(());
    }

    let kops = KopsClient::new(ws.exec, ws.session(), kops_config.clone());
    let cluster_exists = kops.cluster_exists().await?;
    info!(
        "  kops cluster: {}",
        if cluster_exists { "present" } else { "absent" }
    );

    if let Some(dns_zone) = &kops_config.dns_zone {
        match HostedZoneManager::new(aws).find_zone(dns_zone).await? {
            Some(zone) => info!(
                "  Hosted zone: {} ({}, {})",
                dns_zone,
                zone.short_id(),
                if zone.is_private() { "private" } else { "public" }
            ),
            None => info!("  Hosted zone: {} (absent)", dns_zone),
        }
    }

    if cluster_exists {
        info!("");
        info!("Instance groups:");
        match kops.instance_groups().await {
            Ok(groups) => info!("{}", groups.trim_end()),
            Err(e) => info!("Could not list instance groups: {:#}", e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::error::ProvisionError;
    use crate::pipeline::RunState;
    use crate::utils::testing::{fail, ok, ScriptedExecutor};

    const VPCS: &str = r#"{"Vpcs": [{"VpcId": "vpc-0abc"}]}"#;
    const ZONES: &str = r#"{"HostedZones": [{"Id": "/hostedzone/Z123", "Name": "demo.internal.", "Config": {"PrivateZone": true}}]}"#;
    const ASSOCIATED: &str = r#"{"HostedZone": {"Id": "/hostedzone/Z123", "Name": "demo.internal."}, "VPCs": [{"VPCRegion": "us-east-1", "VPCId": "vpc-0abc"}]}"#;

    fn config_with_key(dir: &std::path::Path) -> ClusterConfig {
        let mut config = ClusterConfig::example();
        let key = dir.join("id_rsa.pub");
        std::fs::write(&key, "ssh-rsa AAAA test\n").unwrap();
        config.kops.as_mut().unwrap().ssh_public_key = key.display().to_string();
        config
    }

    #[tokio::test]
    async fn test_create_existing_infrastructure_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_key(dir.path());
        let output = dir.path().join("output");
        let exec = ScriptedExecutor::new()
            .on("aws ec2 describe-vpcs", ok(VPCS))
            .on("aws route53 list-hosted-zones-by-name", ok(ZONES))
            .on("aws route53 get-hosted-zone", ok(ASSOCIATED));
        let installer = ToolInstaller::new(dir.path().join("bin")).unwrap();

        let ws = Workspace::new(&exec, &config, &output);
        let report = create(&ws, &installer).await.unwrap();

        assert_eq!(report.state, RunState::Complete);
        assert_eq!(exec.count("aws s3api create-bucket"), 0);
        assert_eq!(exec.count("kops create cluster"), 0);
        assert_eq!(exec.count("aws route53 create-hosted-zone"), 0);
        assert_eq!(exec.count("aws route53 associate-vpc-with-hosted-zone"), 0);
        assert_eq!(exec.count("ssh-keygen"), 0);
        assert_eq!(exec.count("kops validate cluster"), 1);
        assert!(output.join("cluster.env").exists());
        assert!(output.join("last-run.json").exists());
    }

    #[tokio::test]
    async fn test_create_halts_when_vpc_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_key(dir.path());
        let output = dir.path().join("output");
        let exec = ScriptedExecutor::new().on("aws ec2 describe-vpcs", ok(r#"{"Vpcs": []}"#));
        let installer = ToolInstaller::new(dir.path().join("bin")).unwrap();

        let ws = Workspace::new(&exec, &config, &output);
        let err = create(&ws, &installer).await.unwrap_err();

        match err.downcast_ref::<ProvisionError>() {
            Some(ProvisionError::StepFailed { step, .. }) => assert_eq!(step, "Attach private DNS"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(exec.count("kops validate cluster"), 0);

        let saved: RunReport = serde_json::from_str(
            &std::fs::read_to_string(output.join("last-run.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(saved.state, RunState::Aborted);
    }

    #[tokio::test]
    async fn test_destroy_declined_issues_no_commands() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClusterConfig::example();
        let exec = ScriptedExecutor::new();
        let ws = Workspace::new(&exec, &config, dir.path());

        let err = destroy(&ws, |_| Err(ProvisionError::Declined.into()))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Declined)
        ));
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_confirmed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClusterConfig::example();
        config.kops.as_mut().unwrap().delete_state_store = true;
        let exec = ScriptedExecutor::new()
            .on("aws route53 list-hosted-zones-by-name", ok(ZONES));
        let ws = Workspace::new(&exec, &config, dir.path());
        ws.session().save(dir.path()).await.unwrap();

        let report = destroy(&ws, |prompt| {
            assert!(prompt.contains("demo.k8s.local"));
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(report.completed.len(), 4);
        assert_eq!(exec.count("kops delete cluster"), 1);
        assert_eq!(exec.count("aws route53 delete-hosted-zone"), 1);
        assert_eq!(exec.count("aws s3 rb s3://demo-kops-state-store"), 1);
        assert!(!dir.path().join("cluster.env").exists());
    }

    #[tokio::test]
    async fn test_status_stops_without_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClusterConfig::example();
        let exec = ScriptedExecutor::new().on(
            "aws s3api head-bucket",
            fail("An error occurred (404) when calling the HeadBucket operation: Not Found"),
        );
        let ws = Workspace::new(&exec, &config, dir.path());

        status(&ws).await.unwrap();
        assert_eq!(exec.count("kops"), 0);
    }
}
