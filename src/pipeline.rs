/// Ordered, named provisioning steps that halt on the first failure
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use tracing::{debug, error, info};

use crate::error::ProvisionError;

/// Final state of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Complete,
    Aborted,
}

/// Record of one finished step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// Summary of a pipeline run, persisted after every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub pipeline: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completed: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    /// Write the report as pretty JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create report directory")?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write run report to {}", path.display()))
    }
}

struct Step<'a> {
    name: String,
    action: BoxFuture<'a, Result<()>>,
}

/// Linear chain of named steps
///
/// Steps are lazy futures; a step only starts once every earlier step has succeeded.
pub struct Pipeline<'a> {
    name: String,
    steps: Vec<Step<'a>>,
}

impl<'a> Pipeline<'a> {
    /// Create an empty pipeline
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step
    pub fn step<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'a,
    {
        self.steps.push(Step {
            name: name.into(),
            action: Box::pin(action),
        });
        self
    }

    /// Names of the steps, in execution order
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run every step in order
    ///
    /// Returns the report together with the outcome; on failure the error is
    /// `ProvisionError::StepFailed` naming the step.
    pub async fn run(self) -> (RunReport, Result<(), ProvisionError>) {
        let total = self.steps.len();
        let started_at = Utc::now();
        let mut completed = Vec::with_capacity(total);

        info!("Running {} ({} steps)", self.name, total);
        debug!("Steps: {}", self.step_names().join(" -> "));

        for (index, step) in self.steps.into_iter().enumerate() {
            info!("[{}/{}] {}", index + 1, total, step.name);
            let step_start = Utc::now();

            if let Err(source) = step.action.await {
                error!("[{}/{}] {} failed: {:#}", index + 1, total, step.name, source);
                let report = RunReport {
                    pipeline: self.name,
                    state: RunState::Aborted,
                    started_at,
                    finished_at: Utc::now(),
                    completed,
                    failed_step: Some(step.name.clone()),
                    error: Some(format!("{:#}", source)),
                };
                let err = ProvisionError::StepFailed {
                    step: step.name,
                    index: index + 1,
                    source,
                };
                return (report, Err(err));
            }

            completed.push(StepRecord {
                name: step.name,
                started_at: step_start,
                duration_ms: (Utc::now() - step_start).num_milliseconds(),
            });
        }

        info!("✓ {} complete", self.name);

        let report = RunReport {
            pipeline: self.name,
            state: RunState::Complete,
            started_at,
            finished_at: Utc::now(),
            completed,
            failed_step: None,
            error: None,
        };
        (report, Ok(()))
    }

    /// Run, persist the report to `report_path`, and surface the outcome
    pub async fn run_and_record(self, report_path: &Path) -> Result<RunReport> {
        let (report, outcome) = self.run().await;
        report.save(report_path).await?;
        outcome?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_runs_steps_in_order() {
        let log = Mutex::new(Vec::new());

        let (report, outcome) = Pipeline::new("ordered")
            .step("first", async {
                log.lock().unwrap().push("first");
                Ok(())
            })
            .step("second", async {
                log.lock().unwrap().push("second");
                Ok(())
            })
            .run()
            .await;

        assert!(outcome.is_ok());
        assert_eq!(report.state, RunState::Complete);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(report.completed.len(), 2);
    }

    #[tokio::test]
    async fn test_halts_on_first_failure() {
        let log = Mutex::new(Vec::new());

        let (report, outcome) = Pipeline::new("halting")
            .step("install tools", async {
                log.lock().unwrap().push("install tools");
                Ok(())
            })
            .step("create state store", async {
                log.lock().unwrap().push("create state store");
                anyhow::bail!("AccessDenied")
            })
            .step("create cluster", async {
                log.lock().unwrap().push("create cluster");
                Ok(())
            })
            .run()
            .await;

        assert_eq!(*log.lock().unwrap(), vec!["install tools", "create state store"]);
        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.failed_step.as_deref(), Some("create state store"));
        assert_eq!(report.completed.len(), 1);

        match outcome {
            Err(ProvisionError::StepFailed { step, index, .. }) => {
                assert_eq!(step, "create state store");
                assert_eq!(index, 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_report_persisted_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last-run.json");

        let result = Pipeline::new("persisted")
            .step("boom", async { anyhow::bail!("exploded") })
            .run_and_record(&path)
            .await;
        assert!(result.is_err());

        let saved: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.state, RunState::Aborted);
        assert_eq!(saved.failed_step.as_deref(), Some("boom"));
        assert!(saved.error.unwrap().contains("exploded"));
    }

    #[test]
    fn test_step_names() {
        let pipeline = Pipeline::new("names")
            .step("a", async { Ok(()) })
            .step("b", async { Ok(()) });
        assert_eq!(pipeline.step_names(), vec!["a", "b"]);
    }
}
