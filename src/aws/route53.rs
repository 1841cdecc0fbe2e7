/// Route53 private hosted zone management
use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info};

use super::client::AwsClient;
use super::models::{
    CreateHostedZoneResponse, GetHostedZoneResponse, HostedZone, ListHostedZonesByNameResponse,
};
use crate::error::ProvisionError;
use crate::utils::command::{aws_error_code, Executor};
use crate::utils::idempotent::{ensure, Ensured};
use crate::utils::retry::RetryPolicy;

/// Hosted zone manager
pub struct HostedZoneManager<'a, E> {
    client: AwsClient<'a, E>,
}

impl<'a, E: Executor> HostedZoneManager<'a, E> {
    /// Create a new hosted zone manager
    pub fn new(client: AwsClient<'a, E>) -> Self {
        Self { client }
    }

    /// Find a hosted zone by exact DNS name
    pub async fn find_zone(&self, dns_name: &str) -> Result<Option<HostedZone>> {
        let response: ListHostedZonesByNameResponse = self
            .client
            .call(
                [
                    "route53",
                    "list-hosted-zones-by-name",
                    "--dns-name",
                    dns_name,
                    "--max-items",
                    "1",
                ],
                "Failed to list hosted zones",
            )
            .await?;

        // list-hosted-zones-by-name starts at dns_name but returns the next zone when it is missing
        Ok(response
            .hosted_zones
            .into_iter()
            .find(|z| z.matches_name(dns_name)))
    }

    /// Create a private zone attached to `vpc_id`
    async fn create_private_zone(&self, dns_name: &str, vpc_id: &str) -> Result<HostedZone> {
        let vpc = format!("VPCRegion={},VPCId={}", self.client.region(), vpc_id);
        let caller_reference = format!("kubestrap-{}-{}", dns_name, Utc::now().timestamp_millis());

        let response: CreateHostedZoneResponse = self
            .client
            .call(
                [
                    "route53",
                    "create-hosted-zone",
                    "--name",
                    dns_name,
                    "--vpc",
                    vpc.as_str(),
                    "--caller-reference",
                    caller_reference.as_str(),
                    "--hosted-zone-config",
                    "PrivateZone=true,Comment=managed by kubestrap",
                ],
                "Failed to create hosted zone",
            )
            .await?;

        Ok(response.hosted_zone)
    }

    /// Ensure a private zone named `dns_name` exists, returning its id
    ///
    /// A public zone of the same name cannot take a VPC association and is a guard failure.
    pub async fn ensure_private_zone(&self, dns_name: &str, vpc_id: &str) -> Result<Ensured<String>> {
        let ensured = ensure(
            &format!("hosted zone {}", dns_name),
            || self.find_zone(dns_name),
            || self.create_private_zone(dns_name, vpc_id),
        )
        .await?;

        if let Ensured::Existing(zone) = &ensured {
            if !zone.is_private() {
                return Err(ProvisionError::guard(format!(
                    "Hosted zone {} ({}) is public; a private zone is required for VPC association",
                    dns_name,
                    zone.short_id()
                ))
                .into());
            }
        }

        let ensured = ensured.map(|zone| zone.short_id().to_string());

        info!("Hosted zone {} has id {}", dns_name, ensured.get());
        Ok(ensured)
    }

    /// Whether `vpc_id` is already associated with the zone
    pub async fn is_associated(&self, zone_id: &str, vpc_id: &str) -> Result<bool> {
        let response: GetHostedZoneResponse = self
            .client
            .call(
                ["route53", "get-hosted-zone", "--id", zone_id],
                "Failed to get hosted zone",
            )
            .await?;

        debug!(
            "Hosted zone {} lists {} VPC(s)",
            response.hosted_zone.name,
            response.vpcs.len()
        );
        Ok(response
            .vpcs
            .iter()
            .any(|v| v.vpc_id == vpc_id && v.region == self.client.region()))
    }

    /// One association attempt; an existing association counts as success
    async fn associate_once(&self, zone_id: &str, vpc_id: &str) -> Result<()> {
        let vpc = format!("VPCRegion={},VPCId={}", self.client.region(), vpc_id);
        let output = self
            .client
            .call_raw(
                [
                    "route53",
                    "associate-vpc-with-hosted-zone",
                    "--hosted-zone-id",
                    zone_id,
                    "--vpc",
                    vpc.as_str(),
                ],
                "Failed to associate VPC with hosted zone",
            )
            .await?;

        if output.success {
            return Ok(());
        }

        match aws_error_code(&output.stderr) {
            Some("ConflictingDomainExists") => {
                info!("VPC {} already associated with zone {}", vpc_id, zone_id);
                Ok(())
            }
            _ => Err(ProvisionError::CommandFailed {
                program: "aws".to_string(),
                code: output.code,
                stderr: output.stderr,
            }
            .into()),
        }
    }

    /// Associate `vpc_id` with the zone, retrying under `policy`
    ///
    /// Skipped entirely when the zone already lists the VPC. Exhaustion is returned as an error.
    pub async fn associate_vpc(
        &self,
        zone_id: &str,
        vpc_id: &str,
        policy: &RetryPolicy,
    ) -> Result<Ensured<()>> {
        ensure(
            &format!("association of {} with zone {}", vpc_id, zone_id),
            || async { Ok(self.is_associated(zone_id, vpc_id).await?.then_some(())) },
            || async {
                policy
                    .run(|| self.associate_once(zone_id, vpc_id))
                    .await?;
                Ok(())
            },
        )
        .await
    }

    /// Delete the zone named `dns_name` if it exists
    pub async fn delete_zone(&self, dns_name: &str) -> Result<()> {
        let Some(zone) = self.find_zone(dns_name).await? else {
            info!("Hosted zone {} not found, nothing to delete", dns_name);
            return Ok(());
        };

        info!("Deleting hosted zone {} ({})", dns_name, zone.short_id());
        self.client
            .call_raw(
                ["route53", "delete-hosted-zone", "--id", zone.short_id()],
                "Failed to delete hosted zone",
            )
            .await?
            .into_result("aws")?;
        info!("Hosted zone deleted");

        Ok(())
    }
}
