//! Error types for the sandbox crate.

use std::path::PathBuf;

use thiserror::Error;

/// Sandbox error types.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("execution timed out after {0} seconds")]
    Timeout(u64),

    #[error("workspace path does not exist: {0}")]
    WorkspaceMissing(PathBuf),

    #[error("empty command")]
    EmptyCommand,

    #[error("invalid command syntax: {0}")]
    BadCommand(String),

    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Whether the direct backend may be tried after this failure.
    /// Timeouts are terminal: the command's deadline is already spent.
    pub fn fallback_eligible(&self) -> bool {
        matches!(
            self,
            SandboxError::Unavailable(_) | SandboxError::Spawn(_) | SandboxError::Io(_)
        )
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
