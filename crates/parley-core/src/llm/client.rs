//! Model client seam: message types and the provider-agnostic trait.
//!
//! The actual provider wiring (HTTP, CLIs, auth) lives in the embedding
//! application; this core only sees a [`ClientFactory`] it can ask for
//! clients by model name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use parley_tools::ToolSchema;

/// Chat message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// Assistant message carrying tool-call requests; required so providers
    /// can correlate tool results with their calls.
    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.unwrap_or_default(),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }

    /// Result of one tool call, keyed back to the requesting call id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    MaxTokens,
    Error,
}

/// Token usage for one completion.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Model completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Option<TokenUsage>,
}

/// Model completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: vec![],
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Model call failure, classified for the fallback router.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("{provider} returned status {status}: {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("model error: {0}")]
    Other(String),
}

impl LlmError {
    /// Whether a different model/profile is worth trying after this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http { status, .. } => {
                matches!(status, 408 | 409 | 429) || (500..=599).contains(status)
            }
            LlmError::Other(message) => {
                let lower = message.to_lowercase();
                ["rate limit", "timeout", "timed out", "overloaded", "connection", "unavailable"]
                    .iter()
                    .any(|needle| lower.contains(needle))
            }
        }
    }
}

/// Result type alias for model calls.
pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Provider-agnostic model client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name (for logs).
    fn provider(&self) -> &str;

    /// Model name this client serves.
    fn model(&self) -> &str;

    /// Complete a chat request.
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse>;
}

/// Resolves a model name to clients, one per configured auth profile, in
/// failover order. An empty vec means the model is not configured.
pub trait ClientFactory: Send + Sync {
    fn clients_for(&self, model: &str) -> Vec<Arc<dyn LlmClient>>;
}

/// Factory over a fixed model → clients table.
#[derive(Default)]
pub struct StaticClientFactory {
    clients: HashMap<String, Vec<Arc<dyn LlmClient>>>,
}

impl StaticClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, model: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        self.clients.entry(model.into()).or_default().push(client);
        self
    }
}

impl ClientFactory for StaticClientFactory {
    fn clients_for(&self, model: &str) -> Vec<Arc<dyn LlmClient>> {
        self.clients.get(model).cloned().unwrap_or_default()
    }
}
