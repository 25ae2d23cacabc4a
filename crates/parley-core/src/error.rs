//! Error types for the execution core.

use thiserror::Error;

/// Core error types.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Admission rejected; no run was created.
    #[error("session queue is full")]
    QueueFull,

    /// Every model/fallback/profile combination failed.
    #[error("all configured models failed: {0}")]
    ModelExhausted(String),

    /// A model returned a fatal (non-retryable) error.
    #[error("model call failed: {0}")]
    Llm(String),

    /// External cancellation observed.
    #[error("run aborted")]
    Aborted,

    #[error("run not found: {0}")]
    UnknownRun(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
