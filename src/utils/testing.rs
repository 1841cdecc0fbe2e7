/// Scripted executor for exercising command sequences without spawning processes
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::command::{CommandOutput, CommandSpec, Executor};

struct Rule {
    prefix: String,
    queued: VecDeque<CommandOutput>,
    last: CommandOutput,
}

/// Answers commands by prefix match and records every invocation
///
/// Responses registered for the same prefix are returned in order; the last one repeats.
/// Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response for commands whose display starts with `prefix`
    pub fn on(self, prefix: &str, output: CommandOutput) -> Self {
        {
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|r| r.prefix == prefix) {
                Some(rule) => {
                    rule.queued.push_back(output.clone());
                    rule.last = output;
                }
                None => rules.push(Rule {
                    prefix: prefix.to_string(),
                    queued: VecDeque::from([output.clone()]),
                    last: output,
                }),
            }
        }
        self
    }

    /// Every command run so far, rendered as `program arg...`
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(CommandSpec::display)
            .collect()
    }

    /// Full specs of every command run so far
    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded commands starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl Executor for ScriptedExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let display = spec.display();
        self.calls.lock().unwrap().push(spec.clone());

        let mut rules = self.rules.lock().unwrap();
        let output = rules
            .iter_mut()
            .find(|r| display.starts_with(&r.prefix))
            .map(|rule| rule.queued.pop_front().unwrap_or_else(|| rule.last.clone()))
            .unwrap_or_else(|| ok(""));
        Ok(output)
    }
}

/// Successful output with the given stdout
pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        success: true,
        code: Some(0),
    }
}

/// Failed output with the given stderr
pub fn fail(stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        success: false,
        code: Some(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::command::CommandBuilder;

    #[tokio::test]
    async fn test_responses_in_order_then_last_repeats() {
        let exec = ScriptedExecutor::new()
            .on("kops validate", fail("not ready"))
            .on("kops validate", ok("ready"));

        let first = CommandBuilder::new("kops").args(["validate", "cluster"]).output(&exec).await.unwrap();
        let second = CommandBuilder::new("kops").args(["validate", "cluster"]).output(&exec).await.unwrap();
        let third = CommandBuilder::new("kops").args(["validate", "cluster"]).output(&exec).await.unwrap();

        assert!(!first.success);
        assert!(second.success);
        assert!(third.success);
        assert_eq!(exec.count("kops validate"), 3);
    }

    #[tokio::test]
    async fn test_unmatched_succeeds() {
        let exec = ScriptedExecutor::new();
        let out = CommandBuilder::new("true").output(&exec).await.unwrap();
        assert!(out.success);
        assert_eq!(exec.calls(), vec!["true".to_string()]);
    }
}
