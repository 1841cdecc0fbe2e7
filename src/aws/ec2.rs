/// EC2 lookups for the kops-managed VPC
use anyhow::Result;
use tracing::info;

use super::client::AwsClient;
use super::models::{DescribeVpcsResponse, Vpc};
use crate::error::ProvisionError;
use crate::utils::command::Executor;

/// Tag kops puts on every resource it creates for a cluster
pub const CLUSTER_TAG: &str = "KubernetesCluster";

/// VPC lookup
pub struct VpcManager<'a, E> {
    client: AwsClient<'a, E>,
}

impl<'a, E: Executor> VpcManager<'a, E> {
    /// Create a new VPC manager
    pub fn new(client: AwsClient<'a, E>) -> Self {
        Self { client }
    }

    /// Find the VPC tagged for `cluster_name`, if any
    pub async fn find_cluster_vpc(&self, cluster_name: &str) -> Result<Option<Vpc>> {
        let filter = format!("Name=tag:{},Values={}", CLUSTER_TAG, cluster_name);
        let response: DescribeVpcsResponse = self
            .client
            .call(
                ["ec2", "describe-vpcs", "--filters", filter.as_str()],
                "Failed to describe VPCs",
            )
            .await?;

        Ok(response.vpcs.into_iter().next())
    }

    /// Like [`find_cluster_vpc`](Self::find_cluster_vpc) but a missing VPC is a guard failure
    pub async fn require_cluster_vpc(&self, cluster_name: &str) -> Result<Vpc> {
        match self.find_cluster_vpc(cluster_name).await? {
            Some(vpc) => {
                info!(
                    "Found cluster VPC: {} {} ({})",
                    vpc.vpc_id,
                    vpc.tag("Name").unwrap_or("unnamed"),
                    vpc.cidr_block.as_deref().unwrap_or("no CIDR")
                );
                Ok(vpc)
            }
            None => Err(ProvisionError::guard(format!(
                "VPC not found for cluster {} (tag {}={})",
                cluster_name, CLUSTER_TAG, cluster_name
            ))
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::{ok, ScriptedExecutor};

    #[tokio::test]
    async fn test_find_cluster_vpc() {
        let exec = ScriptedExecutor::new().on(
            "aws ec2 describe-vpcs",
            ok(r#"{"Vpcs": [{"VpcId": "vpc-0abc", "CidrBlock": "172.20.0.0/16"}]}"#),
        );
        let manager = VpcManager::new(AwsClient::new(&exec, "us-east-1"));

        let vpc = manager.require_cluster_vpc("demo.k8s.local").await.unwrap();
        assert_eq!(vpc.vpc_id, "vpc-0abc");
        assert!(exec.calls()[0].contains("Name=tag:KubernetesCluster,Values=demo.k8s.local"));
    }

    #[tokio::test]
    async fn test_missing_vpc_is_guard_failure() {
        let exec = ScriptedExecutor::new().on("aws ec2 describe-vpcs", ok(r#"{"Vpcs": []}"#));
        let manager = VpcManager::new(AwsClient::new(&exec, "us-east-1"));

        let err = manager.require_cluster_vpc("demo.k8s.local").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Guard(_))
        ));
    }
}
