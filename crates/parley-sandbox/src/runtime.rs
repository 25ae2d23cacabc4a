//! Backend-neutral request/result types and the runtime seam.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::policy::ExecPolicy;

/// A single command execution request.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Command line to execute.
    pub command: String,
    /// Working directory on the host.
    pub workdir: PathBuf,
    /// Per-request timeout override, in seconds.
    pub timeout_secs: Option<u64>,
    /// Context label recorded in the registry (e.g. `browser`).
    pub label: Option<String>,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            workdir: workdir.into(),
            timeout_secs: None,
            label: None,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Effective deadline: request override, else policy default.
    pub fn effective_timeout(&self, policy: &ExecPolicy) -> u64 {
        self.timeout_secs.unwrap_or(policy.timeout_secs)
    }
}

/// Which backend actually ran the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Disposable container context.
    Sandbox,
    /// Restricted host subprocess.
    Direct,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sandbox => write!(f, "sandbox"),
            Backend::Direct => write!(f, "direct"),
        }
    }
}

/// Captured result of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub backend: Backend,
    /// Set when the sandbox was requested but the command ran directly.
    pub fallback_reason: Option<String>,
    pub duration_ms: u64,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One execution backend: a disposable container runtime or the direct
/// subprocess fallback. Selection between implementations happens in
/// [`crate::service::SandboxService`], never in callers.
#[async_trait]
pub trait IsolatedRuntime: Send + Sync {
    /// Which backend this runtime represents.
    fn backend(&self) -> Backend;

    /// Probe whether the backend can currently run commands.
    async fn available(&self) -> bool;

    /// Execute one command to completion under the given policy.
    async fn run(&self, request: &ExecRequest, policy: &ExecPolicy) -> Result<ExecOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_timeout_prefers_request() {
        let policy = ExecPolicy::default().with_timeout_secs(60);
        let request = ExecRequest::new("true", "/tmp").with_timeout_secs(5);
        assert_eq!(request.effective_timeout(&policy), 5);

        let request = ExecRequest::new("true", "/tmp");
        assert_eq!(request.effective_timeout(&policy), 60);
    }

    #[test]
    fn backend_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(Backend::Sandbox).unwrap(),
            serde_json::json!("sandbox")
        );
        assert_eq!(Backend::Direct.to_string(), "direct");
    }
}
