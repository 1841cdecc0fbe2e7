/// Thin wrapper around the `aws` CLI
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::utils::command::{CommandBuilder, CommandOutput, Executor};

/// AWS CLI client bound to one region
pub struct AwsClient<'a, E> {
    exec: &'a E,
    region: String,
}

impl<E> Clone for AwsClient<'_, E> {
    fn clone(&self) -> Self {
        Self {
            exec: self.exec,
            region: self.region.clone(),
        }
    }
}

impl<'a, E: Executor> AwsClient<'a, E> {
    /// Create a new AWS CLI client
    pub fn new(exec: &'a E, region: impl Into<String>) -> Self {
        Self {
            exec,
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn command<I, S>(&self, args: I) -> CommandBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandBuilder::new("aws")
            .args(args)
            .args(["--region", self.region.as_str(), "--output", "json"])
    }

    /// Run and parse JSON stdout, failing on non-zero exit
    pub(crate) async fn call<T, I, S>(&self, args: I, context: &str) -> Result<T>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stdout = self
            .command(args)
            .context(context.to_string())
            .run(self.exec)
            .await?;
        debug!("aws response: {}", stdout.trim());

        serde_json::from_str(&stdout).with_context(|| format!("Failed to parse AWS response: {}", context))
    }

    /// Run without interpreting the exit status
    pub(crate) async fn call_raw<I, S>(&self, args: I, context: &str) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command(args)
            .context(context.to_string())
            .output(self.exec)
            .await
    }
}
