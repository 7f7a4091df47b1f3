use anyhow::{Context, Result};
use async_trait::async_trait;
use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

/// Describes an external command the harness delegates to: the stack
/// bootstrap or one of the processor test scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    /// Stable name used in logs and diagnostics (`stack-bootstrap`, `mysql-processor-script`).
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment layered on top of the inherited process environment.
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    /// Upper bound on the run; the child is killed once it elapses.
    pub timeout: Option<Duration>,
}

impl CommandInvocation {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Looks up an environment override by key.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Shell-quoted rendering of the command line for logs.
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| shell_escape::escape(Cow::Borrowed(part)).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Describes the exit status of a command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    success: bool,
    code: Option<i32>,
}

impl CommandStatus {
    pub fn new(success: bool, code: Option<i32>) -> Self {
        Self { success, code }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }
}

impl From<std::process::ExitStatus> for CommandStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        let code = status.code();
        Self {
            success: status.success(),
            code,
        }
    }
}

/// Output produced by the executor for a command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::new(true, Some(0)),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::new(false, Some(code)),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Last `count` non-empty lines of stdout.
    pub fn stdout_tail(&self, count: usize) -> Vec<&str> {
        let lines: Vec<&str> = self
            .stdout
            .trim()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .collect();
        let skip = lines.len().saturating_sub(count);
        lines.into_iter().skip(skip).collect()
    }
}

/// Trait implemented by concrete command execution strategies.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, invocation: &CommandInvocation) -> Result<CommandOutput>;
}

/// Result of running a collaborator: whether it succeeded plus the text an
/// operator needs to diagnose it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorOutcome {
    pub ok: bool,
    pub output: String,
    pub stdout_tail: Vec<String>,
}

/// Runs `invocation` and folds spawn errors and non-zero exits into a plain
/// outcome. Never returns an error.
pub async fn run_collaborator(
    executor: &dyn CommandExecutor,
    invocation: &CommandInvocation,
    tail_lines: usize,
) -> CollaboratorOutcome {
    tracing::debug!(
        name = %invocation.name,
        command = %invocation.display_command(),
        "running collaborator"
    );

    match executor.execute(invocation).await {
        Ok(output) if output.status.success() => CollaboratorOutcome {
            ok: true,
            stdout_tail: output
                .stdout_tail(tail_lines)
                .into_iter()
                .map(str::to_owned)
                .collect(),
            output: output.stdout,
        },
        Ok(output) => {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_owned(), |code| code.to_string());
            let stderr = output.stderr.trim();
            CollaboratorOutcome {
                ok: false,
                stdout_tail: output
                    .stdout_tail(tail_lines)
                    .into_iter()
                    .map(str::to_owned)
                    .collect(),
                output: if stderr.is_empty() {
                    format!("{} exited with status {code}", invocation.name)
                } else {
                    format!("{} exited with status {code}: {stderr}", invocation.name)
                },
            }
        }
        Err(err) => CollaboratorOutcome {
            ok: false,
            output: format!("{err:#}"),
            stdout_tail: Vec::new(),
        },
    }
}

/// Executes commands by spawning the program directly via [`tokio::process::Command`].
#[cfg(feature = "std-process")]
pub struct ProcessCommandExecutor;

#[cfg(feature = "std-process")]
impl ProcessCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "std-process")]
impl Default for ProcessCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std-process")]
#[async_trait]
impl CommandExecutor for ProcessCommandExecutor {
    async fn execute(&self, invocation: &CommandInvocation) -> Result<CommandOutput> {
        use std::process::Stdio;
        use tokio::process::Command;

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().with_context(|| {
            format!(
                "failed to execute {}: {}",
                invocation.name,
                invocation.display_command()
            )
        })?;

        // Dropping the pending future on timeout kills the child.
        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "{} timed out after {:?}: {}",
                        invocation.name,
                        limit,
                        invocation.display_command()
                    )
                })?,
            None => child.wait_with_output().await,
        }
        .with_context(|| format!("failed to wait for {}", invocation.name))?;

        Ok(CommandOutput {
            status: CommandStatus::from(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Records invocations instead of spawning them. Responses can be scripted
/// per invocation name; unscripted invocations succeed with empty output.
#[cfg(feature = "dry-run")]
#[derive(Clone, Default)]
pub struct DryRunCommandExecutor {
    log: std::sync::Arc<parking_lot::Mutex<Vec<CommandInvocation>>>,
    responses: std::sync::Arc<parking_lot::Mutex<Vec<(String, CommandOutput)>>>,
}

#[cfg(feature = "dry-run")]
impl DryRunCommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the output returned for invocations named `name`.
    pub fn respond_with(self, name: impl Into<String>, output: CommandOutput) -> Self {
        self.responses.lock().push((name.into(), output));
        self
    }

    pub fn logged_invocations(&self) -> Vec<CommandInvocation> {
        self.log.lock().clone()
    }

    pub fn invocation_names(&self) -> Vec<String> {
        self.log.lock().iter().map(|inv| inv.name.clone()).collect()
    }
}

#[cfg(feature = "dry-run")]
#[async_trait]
impl CommandExecutor for DryRunCommandExecutor {
    async fn execute(&self, invocation: &CommandInvocation) -> Result<CommandOutput> {
        self.log.lock().push(invocation.clone());
        let scripted = self
            .responses
            .lock()
            .iter()
            .find(|(name, _)| *name == invocation.name)
            .map(|(_, output)| output.clone());
        Ok(scripted.unwrap_or_else(|| CommandOutput::success(String::new())))
    }
}
