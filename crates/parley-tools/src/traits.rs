//! Tool trait and result types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Declared interface of a tool, as handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the parameters.
    pub parameters: Value,
}

/// Result of tool execution. Failures are data: the registry renders them
/// into a string for the model rather than propagating them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
}

impl ToolOutput {
    /// Create a successful tool output.
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    /// Create a successful tool output from plain text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::success(Value::String(text.into()))
    }

    /// Create an error tool output.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Core trait for agent tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (used in model tool calls).
    fn name(&self) -> &str;

    /// Human-readable description for model context.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters. The registry validates supplied
    /// parameters against this before `execute` runs.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with validated input.
    async fn execute(&self, input: Value) -> Result<ToolOutput>;

    /// Build the complete schema for the model.
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}
