/// Command execution utilities to reduce code duplication
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::ProvisionError;

/// Result from command execution with captured output
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Create from tokio Command output
    fn from_output(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }

    /// Return Ok if successful, otherwise a `CommandFailed` error carrying stderr
    pub fn into_result(self, program: &str) -> Result<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(ProvisionError::CommandFailed {
                program: program.to_string(),
                code: self.code,
                stderr: self.stderr,
            }
            .into())
        }
    }
}

/// A fully described invocation of an external program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Program followed by its arguments, space separated
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs a `CommandSpec` and captures its output
///
/// The process-spawning implementation is [`SystemExecutor`]; tests substitute a scripted one.
pub trait Executor: Sync {
    fn execute(&self, spec: &CommandSpec) -> impl Future<Output = Result<CommandOutput>> + Send;
}

/// Executor that spawns real processes
///
/// `PATH` for children is set per command, so the process environment is never mutated.
#[derive(Debug, Clone, Default)]
pub struct SystemExecutor {
    path: Option<OsString>,
}

impl SystemExecutor {
    /// Spawn every command with `dir` placed first on `PATH`
    pub fn with_path_prefix(dir: &Path) -> Self {
        Self {
            path: Some(crate::tools::path_with(dir, std::env::var_os("PATH"))),
        }
    }
}

impl Executor for SystemExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("exec: {}", spec.display());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(path) = &self.path {
            command.env("PATH", path);
        }
        for (key, val) in &spec.env {
            command.env(key, val);
        }

        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", spec.program))?;
        Ok(CommandOutput::from_output(output))
    }
}

/// Builder for executing external commands with common patterns
pub struct CommandBuilder {
    spec: CommandSpec,
    context_msg: Option<String>,
}

impl CommandBuilder {
    /// Create a new command builder
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            spec: CommandSpec {
                program: program.into(),
                args: Vec::new(),
                env: Vec::new(),
            },
            context_msg: None,
        }
    }

    /// Add a single argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.spec.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a path argument
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.spec.env.push((key.into(), val.into()));
        self
    }

    /// Set several environment variables
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.spec
            .env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set KUBECONFIG environment variable
    pub fn kubeconfig(self, path: &Path) -> Self {
        let path = path.to_string_lossy().to_string();
        self.env("KUBECONFIG", path)
    }

    /// Set context message for error reporting
    pub fn context<S: Into<String>>(mut self, msg: S) -> Self {
        self.context_msg = Some(msg.into());
        self
    }

    /// The invocation this builder describes
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Execute and return raw output, whatever the exit status
    pub async fn output<E: Executor>(self, exec: &E) -> Result<CommandOutput> {
        let result = exec.execute(&self.spec).await;
        match self.context_msg {
            Some(ctx) => result.context(ctx),
            None => result,
        }
    }

    /// Execute and return stdout on success, error on failure
    pub async fn run<E: Executor>(self, exec: &E) -> Result<String> {
        let program = self.spec.program.clone();
        let context_msg = self.context_msg.clone();
        let result = self.output(exec).await?.into_result(&program);
        match context_msg {
            Some(ctx) => result.context(ctx),
            None => result,
        }
    }

    /// Execute and ignore output (just check success)
    pub async fn run_silent<E: Executor>(self, exec: &E) -> Result<()> {
        self.run(exec).await.map(|_| ())
    }
}

/// Check if a command-line tool is installed
pub async fn check_tool_installed<E: Executor>(
    exec: &E,
    tool_name: &str,
    version_args: &[&str],
    install_hint: &str,
) -> Result<()> {
    let output = CommandBuilder::new(tool_name)
        .args(version_args.iter().copied())
        .output(exec)
        .await;

    match output {
        Ok(out) if out.success => Ok(()),
        _ => Err(ProvisionError::guard(format!(
            "{} is not installed or not in PATH. {}",
            tool_name, install_hint
        ))
        .into()),
    }
}

/// Whether a tool answers its version query, without failing
pub async fn tool_available<E: Executor>(exec: &E, tool_name: &str, version_args: &[&str]) -> bool {
    check_tool_installed(exec, tool_name, version_args, "")
        .await
        .is_ok()
}

/// Extract an AWS CLI error code such as `BucketAlreadyOwnedByYou` from stderr
///
/// The AWS CLI reports service errors as `An error occurred (<Code>) when calling ...`.
pub fn aws_error_code(stderr: &str) -> Option<&str> {
    let start = stderr.find("An error occurred (")? + "An error occurred (".len();
    let rest = &stderr[start..];
    let end = rest.find(')')?;
    Some(&rest[..end])
}
