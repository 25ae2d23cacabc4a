//! Execution policy consumed from the embedding application's config.

use std::path::PathBuf;

/// Default one-shot container image.
pub const DEFAULT_IMAGE: &str = "alpine:3.18";

/// Default hard timeout for a single execution, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Policy controlling where and how a command executes.
///
/// Read-only from the sandbox's point of view; ownership of the values
/// belongs to the application's configuration layer.
#[derive(Debug, Clone)]
pub struct ExecPolicy {
    /// Run inside a disposable container when the runtime is reachable.
    pub sandbox_enabled: bool,
    /// Container image for one-shot contexts.
    pub image: String,
    /// Host directory mounted as the container workspace. When unset, the
    /// request's working directory is mounted instead.
    pub workspace_mount: Option<PathBuf>,
    /// Container network mode (`none` by default).
    pub network: String,
    /// Non-privileged user to run as inside the container (e.g. `1000:1000`).
    pub user: Option<String>,
    /// Hard deadline per execution.
    pub timeout_secs: u64,
    /// When true, commands go through `sh -c` so pipes and redirects work.
    /// When false, the direct backend execs a tokenized argv with no shell.
    pub shell_mode: bool,
    /// Permit direct subprocess execution when the container runtime is
    /// unavailable or container creation fails.
    pub allow_fallback: bool,
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            sandbox_enabled: false,
            image: DEFAULT_IMAGE.to_string(),
            workspace_mount: None,
            network: "none".to_string(),
            user: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            shell_mode: false,
            allow_fallback: true,
        }
    }
}

impl ExecPolicy {
    /// Enable container-backed execution with the given image.
    pub fn with_sandbox(mut self, image: impl Into<String>) -> Self {
        self.sandbox_enabled = true;
        self.image = image.into();
        self
    }

    /// Set the host workspace mount.
    pub fn with_workspace_mount(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_mount = Some(path.into());
        self
    }

    /// Set the container network mode.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Set the container user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the per-execution timeout in seconds.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Enable or disable shell mode.
    pub fn with_shell_mode(mut self, shell_mode: bool) -> Self {
        self.shell_mode = shell_mode;
        self
    }

    /// Permit or forbid direct fallback.
    pub fn with_fallback(mut self, allow: bool) -> Self {
        self.allow_fallback = allow;
        self
    }
}
