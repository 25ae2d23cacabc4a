//! One-shot Docker execution contexts.
//!
//! Each invocation runs `docker run --rm` with only the workspace mounted,
//! the configured network mode (default `none`), and an optional
//! non-privileged user. The container carries a label so stale instances can
//! be found and removed out-of-band.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Result, SandboxError};
use crate::policy::ExecPolicy;
use crate::registry::{ContextRecord, ContextRegistry};
use crate::runtime::{Backend, ExecOutcome, ExecRequest, IsolatedRuntime};

/// Label attached to every Parley container.
pub const SANDBOX_LABEL: &str = "parley.sandbox=1";

/// Container path the workspace is mounted at.
const WORKSPACE_MOUNT_POINT: &str = "/workspace";

/// Deadline for the `docker info` availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A live container as reported by `docker ps`.
#[derive(Debug, Clone)]
pub struct LiveContainer {
    pub id: String,
    pub name: String,
    pub image: String,
}

/// Docker-backed [`IsolatedRuntime`].
pub struct DockerRuntime {
    registry: Arc<ContextRegistry>,
}

impl DockerRuntime {
    pub fn new(registry: Arc<ContextRegistry>) -> Self {
        Self { registry }
    }

    /// Whether the docker CLI exists and the daemon answers within the probe
    /// deadline.
    pub async fn probe_available() -> bool {
        let probe = Command::new("docker")
            .arg("info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        matches!(timeout(PROBE_TIMEOUT, probe).await, Ok(Ok(status)) if status.success())
    }

    /// List live containers carrying the Parley label.
    pub async fn list_live() -> Vec<LiveContainer> {
        let filter = format!("label={SANDBOX_LABEL}");
        let output = Command::new("docker")
            .args([
                "ps",
                "-a",
                "--filter",
                filter.as_str(),
                "--format",
                "{{json .}}",
            ])
            .kill_on_drop(true)
            .output();
        let Ok(Ok(output)) = timeout(Duration::from_secs(15), output).await else {
            return Vec::new();
        };
        if !output.status.success() {
            return Vec::new();
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| {
                let obj: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
                let id = obj.get("ID")?.as_str()?.to_string();
                Some(LiveContainer {
                    id,
                    name: obj
                        .get("Names")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    image: obj
                        .get("Image")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect()
    }

    /// Force-remove a container by id or name (`docker rm -f`).
    pub async fn remove_container(id_or_name: &str) -> Result<()> {
        let id = id_or_name.trim();
        if id.is_empty() {
            return Err(SandboxError::EmptyCommand);
        }
        let output = Command::new("docker")
            .args(["rm", "-f", id])
            .kill_on_drop(true)
            .output();
        let output = timeout(Duration::from_secs(30), output)
            .await
            .map_err(|_| SandboxError::Timeout(30))?
            .map_err(|e| SandboxError::Spawn(e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(SandboxError::Spawn(if stderr.is_empty() {
                format!("docker rm exited with {}", output.status.code().unwrap_or(-1))
            } else {
                stderr
            }))
        }
    }

    fn resolve_workspace(request: &ExecRequest, policy: &ExecPolicy) -> Result<PathBuf> {
        let host = policy
            .workspace_mount
            .clone()
            .unwrap_or_else(|| request.workdir.clone());
        if !host.exists() {
            return Err(SandboxError::WorkspaceMissing(host));
        }
        Ok(host)
    }
}

#[async_trait]
impl IsolatedRuntime for DockerRuntime {
    fn backend(&self) -> Backend {
        Backend::Sandbox
    }

    async fn available(&self) -> bool {
        Self::probe_available().await
    }

    async fn run(&self, request: &ExecRequest, policy: &ExecPolicy) -> Result<ExecOutcome> {
        let host_workspace = Self::resolve_workspace(request, policy)?;
        let timeout_secs = request.effective_timeout(policy);

        let context_id = uuid::Uuid::new_v4().simple().to_string();
        let container_name = format!("parley-sbx-{}", &context_id[..12]);

        let mount = format!("{}:{}", host_workspace.display(), WORKSPACE_MOUNT_POINT);
        let mut cmd = Command::new("docker");
        cmd.args(["run", "--rm"])
            .args(["--name", container_name.as_str()])
            .args(["--label", SANDBOX_LABEL])
            .args(["-v", mount.as_str()])
            .args(["-w", WORKSPACE_MOUNT_POINT])
            .args(["--network", policy.network.as_str()]);
        if let Some(user) = policy.user.as_deref().filter(|u| !u.trim().is_empty()) {
            cmd.args(["--user", user.trim()]);
        }
        // Always sh -c inside the container so pipes and redirects work.
        cmd.args([policy.image.as_str(), "sh", "-c", request.command.as_str()])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        self.registry.record(ContextRecord {
            id: context_id.clone(),
            label: request.label.clone().unwrap_or_default(),
            image: policy.image.clone(),
            created_at: Utc::now(),
        });
        debug!(context_id = %context_id, image = %policy.image, "Creating execution context");

        let started = Instant::now();
        let result = timeout(Duration::from_secs(timeout_secs), cmd.output()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.registry.forget(&context_id);
                return Err(SandboxError::Spawn(e.to_string()));
            }
            Err(_) => {
                // Dropping the child killed the docker CLI; the container
                // itself still needs a forced remove.
                warn!(context_id = %context_id, timeout_secs, "Execution context timed out");
                let name = container_name.clone();
                tokio::spawn(async move {
                    let _ = Self::remove_container(&name).await;
                });
                self.registry.forget(&context_id);
                return Err(SandboxError::Timeout(timeout_secs));
            }
        };

        self.registry.forget(&context_id);
        debug!(context_id = %context_id, duration_ms, "Execution context torn down");

        Ok(ExecOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            backend: Backend::Sandbox,
            fallback_reason: None,
            duration_ms,
        })
    }
}
