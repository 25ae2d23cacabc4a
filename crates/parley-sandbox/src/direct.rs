//! Direct subprocess execution, used when the container runtime is disabled
//! or unreachable and policy permits the fallback.
//!
//! Shell mode runs through `sh -c`; otherwise the command line is tokenized
//! and exec'd without a shell, so metacharacters have no effect here even if
//! a caller's guard missed them.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::policy::ExecPolicy;
use crate::runtime::{Backend, ExecOutcome, ExecRequest, IsolatedRuntime};

/// Subprocess-backed [`IsolatedRuntime`].
#[derive(Debug, Default, Clone)]
pub struct DirectRuntime;

impl DirectRuntime {
    pub fn new() -> Self {
        Self
    }

    fn build_command(request: &ExecRequest, policy: &ExecPolicy) -> Result<Command> {
        let mut cmd = if policy.shell_mode {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&request.command);
            cmd
        } else {
            let argv = shell_words::split(&request.command)
                .map_err(|e| SandboxError::BadCommand(e.to_string()))?;
            let Some((program, args)) = argv.split_first() else {
                return Err(SandboxError::EmptyCommand);
            };
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        };
        cmd.current_dir(&request.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl IsolatedRuntime for DirectRuntime {
    fn backend(&self) -> Backend {
        Backend::Direct
    }

    async fn available(&self) -> bool {
        true
    }

    async fn run(&self, request: &ExecRequest, policy: &ExecPolicy) -> Result<ExecOutcome> {
        if !request.workdir.exists() {
            return Err(SandboxError::WorkspaceMissing(request.workdir.clone()));
        }
        let timeout_secs = request.effective_timeout(policy);
        let mut cmd = Self::build_command(request, policy)?;

        let started = Instant::now();
        let result = timeout(Duration::from_secs(timeout_secs), cmd.output()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(SandboxError::Spawn(e.to_string())),
            Err(_) => return Err(SandboxError::Timeout(timeout_secs)),
        };

        debug!(
            exit_code = output.status.code().unwrap_or(-1),
            duration_ms, "Direct execution finished"
        );

        Ok(ExecOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            backend: Backend::Direct,
            fallback_reason: None,
            duration_ms,
        })
    }
}
