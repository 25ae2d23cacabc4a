//! Backend selection, fallback, and out-of-band cleanup.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::direct::DirectRuntime;
use crate::docker::DockerRuntime;
use crate::error::{Result, SandboxError};
use crate::policy::ExecPolicy;
use crate::registry::{CleanupOp, ContextRegistry};
use crate::runtime::{Backend, ExecOutcome, ExecRequest, IsolatedRuntime};

/// Which execution contexts a force-cleanup pass targets. An empty filter
/// matches everything.
#[derive(Debug, Clone, Default)]
pub struct CleanupFilter {
    pub label: Option<String>,
    pub older_than: Option<Duration>,
}

impl CleanupFilter {
    fn describe(&self) -> String {
        match (&self.label, &self.older_than) {
            (Some(label), Some(age)) => format!("label={label} older_than={}s", age.as_secs()),
            (Some(label), None) => format!("label={label}"),
            (None, Some(age)) => format!("older_than={}s", age.as_secs()),
            (None, None) => "all".to_string(),
        }
    }
}

/// Result of one force-cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub docker_available: bool,
}

/// Point-in-time snapshot of effective policy and backend state.
#[derive(Debug, Clone, Serialize)]
pub struct ExplainReport {
    pub sandbox_enabled: bool,
    pub image: String,
    pub network: String,
    pub user: Option<String>,
    pub timeout_secs: u64,
    pub shell_mode: bool,
    pub allow_fallback: bool,
    pub docker_available: bool,
    pub backend: Backend,
    pub contexts: usize,
}

/// Front door for command execution: picks the backend per policy and
/// availability, applies the fallback path, and owns the context registry.
pub struct SandboxService {
    policy: ExecPolicy,
    registry: Arc<ContextRegistry>,
    docker: DockerRuntime,
    direct: DirectRuntime,
}

impl SandboxService {
    pub fn new(policy: ExecPolicy) -> Self {
        let registry = Arc::new(ContextRegistry::new());
        Self {
            docker: DockerRuntime::new(Arc::clone(&registry)),
            direct: DirectRuntime::new(),
            policy,
            registry,
        }
    }

    pub fn policy(&self) -> &ExecPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// Execute one command under the configured policy.
    pub async fn run(&self, request: ExecRequest) -> Result<ExecOutcome> {
        if !self.policy.sandbox_enabled {
            return self.direct.run(&request, &self.policy).await;
        }
        let available = self.docker.available().await;
        self.run_with_availability(request, available).await
    }

    /// Backend selection with the availability probe factored out.
    pub(crate) async fn run_with_availability(
        &self,
        request: ExecRequest,
        docker_available: bool,
    ) -> Result<ExecOutcome> {
        if !docker_available {
            if !self.policy.allow_fallback {
                return Err(SandboxError::Unavailable(
                    "container runtime unreachable".to_string(),
                ));
            }
            warn!("Container runtime unavailable, running directly");
            let mut outcome = self.direct.run(&request, &self.policy).await?;
            outcome.fallback_reason =
                Some("container runtime unavailable; ran directly".to_string());
            return Ok(outcome);
        }

        match self.docker.run(&request, &self.policy).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.fallback_eligible() && self.policy.allow_fallback => {
                warn!(error = %e, "Container execution failed, running directly");
                let mut outcome = self.direct.run(&request, &self.policy).await?;
                outcome.fallback_reason =
                    Some(format!("container execution failed ({e}); ran directly"));
                Ok(outcome)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove execution contexts matching the filter: registry entries plus,
    /// when the runtime is reachable, any live labeled containers.
    pub async fn force_cleanup(&self, filter: CleanupFilter) -> CleanupReport {
        let docker_available = DockerRuntime::probe_available().await;
        self.cleanup_with_availability(filter, docker_available)
            .await
    }

    pub(crate) async fn cleanup_with_availability(
        &self,
        filter: CleanupFilter,
        docker_available: bool,
    ) -> CleanupReport {
        let mut removed = self
            .registry
            .remove_matching(filter.label.as_deref(), filter.older_than);

        if docker_available {
            for id in &removed {
                let name = format!("parley-sbx-{}", &id[..id.len().min(12)]);
                let _ = DockerRuntime::remove_container(&name).await;
            }
            // With no filter, also sweep live containers the registry no
            // longer knows about.
            if filter.label.is_none() && filter.older_than.is_none() {
                for live in DockerRuntime::list_live().await {
                    if DockerRuntime::remove_container(&live.id).await.is_ok() {
                        removed.push(live.id);
                    }
                }
            }
        }

        info!(removed = removed.len(), filter = %filter.describe(), "Force-cleanup pass finished");
        self.registry.log_cleanup(CleanupOp {
            requested_at: Utc::now(),
            filter: filter.describe(),
            removed: removed.clone(),
        });

        CleanupReport {
            removed,
            docker_available,
        }
    }

    /// Snapshot of the effective policy and backend availability.
    pub async fn explain(&self) -> ExplainReport {
        let docker_available =
            self.policy.sandbox_enabled && DockerRuntime::probe_available().await;
        ExplainReport {
            sandbox_enabled: self.policy.sandbox_enabled,
            image: self.policy.image.clone(),
            network: self.policy.network.clone(),
            user: self.policy.user.clone(),
            timeout_secs: self.policy.timeout_secs,
            shell_mode: self.policy.shell_mode,
            allow_fallback: self.policy.allow_fallback,
            docker_available,
            backend: if docker_available {
                Backend::Sandbox
            } else {
                Backend::Direct
            },
            contexts: self.registry.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ContextRecord;

    #[tokio::test]
    #[cfg(unix)]
    async fn disabled_sandbox_runs_directly() {
        let service = SandboxService::new(ExecPolicy::default());
        let outcome = service
            .run(ExecRequest::new("echo hello", std::env::temp_dir()))
            .await
            .unwrap();
        assert_eq!(outcome.backend, Backend::Direct);
        assert_eq!(outcome.stdout, "hello\n");
        assert!(outcome.fallback_reason.is_none());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn unavailable_runtime_falls_back_with_reason() {
        let policy = ExecPolicy::default().with_sandbox("alpine:3.18");
        let service = SandboxService::new(policy);
        let outcome = service
            .run_with_availability(ExecRequest::new("echo hello", std::env::temp_dir()), false)
            .await
            .unwrap();
        assert_eq!(outcome.backend, Backend::Direct);
        assert_eq!(outcome.stdout, "hello\n");
        assert!(
            outcome
                .fallback_reason
                .as_deref()
                .unwrap()
                .contains("unavailable")
        );
    }

    #[tokio::test]
    async fn unavailable_runtime_without_fallback_errors() {
        let policy = ExecPolicy::default()
            .with_sandbox("alpine:3.18")
            .with_fallback(false);
        let service = SandboxService::new(policy);
        let err = service
            .run_with_availability(ExecRequest::new("echo hello", std::env::temp_dir()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Unavailable(_)));
    }

    #[tokio::test]
    async fn cleanup_without_docker_clears_registry() {
        let service = SandboxService::new(ExecPolicy::default());
        service.registry().record(ContextRecord {
            id: "ctx-1".to_string(),
            label: "browser".to_string(),
            image: "alpine:3.18".to_string(),
            created_at: Utc::now(),
        });
        service.registry().record(ContextRecord {
            id: "ctx-2".to_string(),
            label: String::new(),
            image: "alpine:3.18".to_string(),
            created_at: Utc::now(),
        });

        let report = service
            .cleanup_with_availability(
                CleanupFilter {
                    label: Some("browser".to_string()),
                    older_than: None,
                },
                false,
            )
            .await;
        assert_eq!(report.removed, vec!["ctx-1".to_string()]);
        assert_eq!(service.registry().len(), 1);

        let history = service.registry().cleanup_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].filter, "label=browser");
    }

    #[tokio::test]
    async fn explain_reports_policy() {
        let service = SandboxService::new(ExecPolicy::default().with_timeout_secs(42));
        let explain = service.explain().await;
        assert!(!explain.sandbox_enabled);
        assert_eq!(explain.timeout_secs, 42);
        assert_eq!(explain.backend, Backend::Direct);
        assert_eq!(explain.contexts, 0);
    }
}
