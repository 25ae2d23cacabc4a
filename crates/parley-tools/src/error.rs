//! Error types for the tool layer.

use thiserror::Error;

/// Tool layer error types.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool disabled: {0}")]
    Disabled(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] parley_sandbox::SandboxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tool operations.
pub type Result<T> = std::result::Result<T, ToolError>;
