/// S3 bucket management for the kops state store
use anyhow::Result;
use tracing::{info, warn};

use super::client::AwsClient;
use crate::error::ProvisionError;
use crate::utils::command::{aws_error_code, Executor};
use crate::utils::idempotent::{ensure, Ensured};

/// Manages the bucket that backs `KOPS_STATE_STORE`
pub struct StateStoreManager<'a, E> {
    client: AwsClient<'a, E>,
}

impl<'a, E: Executor> StateStoreManager<'a, E> {
    /// Create a new state store manager
    pub fn new(client: AwsClient<'a, E>) -> Self {
        Self { client }
    }

    /// Whether the bucket exists and is reachable with the current credentials
    ///
    /// A 404 is "absent"; a 403 means another account owns the name, which is an error rather than
    /// absence. Any other failure is surfaced unchanged.
    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let output = self
            .client
            .call_raw(
                ["s3api", "head-bucket", "--bucket", bucket],
                "Failed to query state store bucket",
            )
            .await?;

        if output.success {
            return Ok(true);
        }

        match aws_error_code(&output.stderr) {
            Some("404") | Some("NoSuchBucket") | Some("NotFound") => Ok(false),
            Some("403") | Some("Forbidden") => Err(ProvisionError::guard(format!(
                "Bucket {} exists but is not accessible to this account",
                bucket
            ))
            .into()),
            _ => Err(ProvisionError::CommandFailed {
                program: "aws".to_string(),
                code: output.code,
                stderr: output.stderr,
            }
            .into()),
        }
    }

    /// Create the bucket, treating "already owned by you" as success
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let region = self.client.region().to_string();
        let mut args = vec![
            "s3api".to_string(),
            "create-bucket".to_string(),
            "--bucket".to_string(),
            bucket.to_string(),
        ];
        // us-east-1 rejects an explicit LocationConstraint
        if region != "us-east-1" {
            args.push("--create-bucket-configuration".to_string());
            args.push(format!("LocationConstraint={}", region));
        }

        let output = self
            .client
            .call_raw(args, "Failed to create state store bucket")
            .await?;

        if output.success {
            return Ok(());
        }

        match aws_error_code(&output.stderr) {
            Some("BucketAlreadyOwnedByYou") => {
                info!("Bucket {} already owned by this account", bucket);
                Ok(())
            }
            Some("BucketAlreadyExists") => Err(ProvisionError::guard(format!(
                "Bucket name {} is taken by another account; choose a different state_bucket",
                bucket
            ))
            .into()),
            _ => Err(ProvisionError::CommandFailed {
                program: "aws".to_string(),
                code: output.code,
                stderr: output.stderr,
            }
            .into()),
        }
    }

    /// Enable object versioning so earlier cluster specs can be recovered
    async fn enable_versioning(&self, bucket: &str) -> Result<()> {
        self.client
            .call_raw(
                [
                    "s3api",
                    "put-bucket-versioning",
                    "--bucket",
                    bucket,
                    "--versioning-configuration",
                    "Status=Enabled",
                ],
                "Failed to enable bucket versioning",
            )
            .await?
            .into_result("aws")?;
        Ok(())
    }

    /// Ensure the state store bucket exists with versioning enabled
    pub async fn ensure_state_store(&self, bucket: &str) -> Result<Ensured<String>> {
        let ensured = ensure(
            &format!("state store bucket {}", bucket),
            || async {
                Ok(self
                    .bucket_exists(bucket)
                    .await?
                    .then(|| bucket.to_string()))
            },
            || async {
                self.create_bucket(bucket).await?;
                Ok(bucket.to_string())
            },
        )
        .await?;

        self.enable_versioning(bucket).await?;
        info!("✓ State store ready: s3://{}", bucket);

        Ok(ensured)
    }

    /// Delete the bucket and everything in it
    pub async fn delete_state_store(&self, bucket: &str) -> Result<()> {
        if !self.bucket_exists(bucket).await? {
            info!("State store bucket {} not found, nothing to delete", bucket);
            return Ok(());
        }

        warn!("Deleting state store bucket {} and all of its objects", bucket);
        self.client
            .call_raw(
                ["s3".to_string(), "rb".to_string(), format!("s3://{}", bucket), "--force".to_string()],
                "Failed to delete state store bucket",
            )
            .await?
            .into_result("aws")?;
        info!("State store bucket deleted");

        Ok(())
    }
}
