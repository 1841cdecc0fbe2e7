/// Bounded retry with a fixed delay between attempts
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ProvisionError;

/// Attempts used by the provisioning scripts this tool replaces
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Seconds slept between attempts
pub const DEFAULT_DELAY_SECS: u64 = 10;

/// Configuration for a retried operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub description: String,
}

/// Value produced by a retried operation and the attempt it succeeded on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Create a new retry policy; `max_attempts` is clamped to at least one
    pub fn new(max_attempts: u32, delay_secs: u64, description: impl Into<String>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: Duration::from_secs(delay_secs),
            description: description.into(),
        }
    }

    /// Run `operation` until it returns `Ok` or the attempt budget is spent
    ///
    /// No sleep follows the final attempt. Every attempt repeats the external effect, so the
    /// operation must be safe to repeat.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<Retried<T>, ProvisionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        info!("{}...", self.description);

        let mut attempt = 0;
        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    info!("✓ {} (attempt {}/{})", self.description, attempt, self.max_attempts);
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    });
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!(
                        "{} failed on final attempt {}/{}: {:#}",
                        self.description, attempt, self.max_attempts, e
                    );
                    return Err(ProvisionError::RetriesExhausted {
                        operation: self.description.clone(),
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {}s: {:#}",
                        self.description,
                        attempt,
                        self.max_attempts,
                        self.delay.as_secs(),
                        e
                    );
                }
            }

            tokio::time::sleep(self.delay).await;
        }
    }

    /// Run until the condition returns `Ok(true)`
    ///
    /// `Ok(false)` counts as a failed attempt.
    pub async fn run_until<F, Fut>(&self, mut condition: F) -> Result<u32, ProvisionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let description = self.description.clone();
        self.run(|| {
            let fut = condition();
            let description = description.clone();
            async move {
                if fut.await? {
                    Ok(())
                } else {
                    anyhow::bail!("condition not met: {}", description)
                }
            }
        })
        .await
        .map(|retried| retried.attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_DELAY_SECS, "Retrying operation")
    }
}
