/// Typed errors for the provisioning core
use thiserror::Error;

/// Errors raised by the retry, idempotency and pipeline primitives
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// External command exited with a non-zero status
    #[error("{program} failed (exit code {}): {}", code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()), stderr.trim())]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Explicitly checked precondition did not hold
    #[error("{0}")]
    Guard(String),

    /// Every attempt of a retried operation failed
    #[error("{operation}: gave up after {attempts} attempts: {last_error:#}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: anyhow::Error,
    },

    /// Existence lookup could not be answered
    #[error("Failed to check whether {what} exists")]
    LookupFailed {
        what: String,
        source: anyhow::Error,
    },

    /// Operator did not confirm a destructive action
    #[error("Aborted: confirmation not given")]
    Declined,

    /// A pipeline step failed and the run was halted
    #[error("Step {index} ({step}) failed")]
    StepFailed {
        step: String,
        index: usize,
        source: anyhow::Error,
    },
}

impl ProvisionError {
    /// Create a guard failure
    pub fn guard(message: impl Into<String>) -> Self {
        Self::Guard(message.into())
    }
}
