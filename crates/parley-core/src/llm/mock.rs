//! Deterministic scripted mock client for loop and scheduler tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{Duration, sleep};

use super::client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, LlmError, LlmResult, Role,
    TokenUsage, ToolCall,
};

/// Scripted response kinds.
#[derive(Debug, Clone)]
pub enum MockStepKind {
    /// Plain assistant message.
    Text(String),
    /// Tool call response.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// Model error (classified by message content).
    Error(String),
}

/// One scripted completion step with an optional delay.
#[derive(Debug, Clone)]
pub struct MockStep {
    pub delay_ms: u64,
    pub kind: MockStepKind,
}

impl MockStep {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Text(content.into()),
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::ToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Error(message.into()),
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// Scripted mock [`LlmClient`]. Steps pop in order; an exhausted script
/// echoes the last user message so tests always terminate.
#[derive(Clone, Default)]
pub struct MockLlmClient {
    model: String,
    script: Arc<Mutex<VecDeque<MockStep>>>,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            script: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn from_steps(model: impl Into<String>, steps: Vec<MockStep>) -> Self {
        Self {
            model: model.into(),
            script: Arc::new(Mutex::new(VecDeque::from(steps))),
        }
    }

    pub async fn push_step(&self, step: MockStep) {
        self.script.lock().await.push_back(step);
    }

    fn fallback_response(request: &CompletionRequest) -> CompletionResponse {
        let text = request
            .messages
            .iter()
            .rev()
            .find(|msg| msg.role == Role::User)
            .map(|msg| format!("mock-echo: {}", msg.content))
            .unwrap_or_else(|| "mock-ok".to_string());
        CompletionResponse {
            usage: Some(TokenUsage {
                prompt_tokens: 1,
                completion_tokens: text.len() as u32,
                total_tokens: 1 + text.len() as u32,
            }),
            content: Some(text),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let step = self.script.lock().await.pop_front();
        let Some(step) = step else {
            return Ok(Self::fallback_response(&request));
        };

        if step.delay_ms > 0 {
            sleep(Duration::from_millis(step.delay_ms)).await;
        }

        match step.kind {
            MockStepKind::Text(content) => Ok(CompletionResponse {
                usage: None,
                content: Some(content),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
            }),
            MockStepKind::ToolCall {
                id,
                name,
                arguments,
            } => Ok(CompletionResponse {
                usage: None,
                content: None,
                tool_calls: vec![ToolCall {
                    id,
                    name,
                    arguments,
                }],
                finish_reason: FinishReason::ToolCalls,
            }),
            MockStepKind::Error(message) => Err(LlmError::Other(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::Message;

    #[tokio::test]
    async fn scripted_text_step() {
        let client = MockLlmClient::from_steps("mock-model", vec![MockStep::text("hello")]);
        let response = client
            .complete(CompletionRequest::new(vec![Message::user("ping")]))
            .await
            .unwrap();
        assert_eq!(response.content.as_deref(), Some("hello"));
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn scripted_tool_call_step() {
        let client = MockLlmClient::from_steps(
            "mock-model",
            vec![MockStep::tool_call(
                "call-1",
                "exec",
                serde_json::json!({"command": "ls"}),
            )],
        );
        let response = client
            .complete(CompletionRequest::new(vec![Message::user("go")]))
            .await
            .unwrap();
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.tool_calls[0].name, "exec");
    }

    #[tokio::test]
    async fn exhausted_script_echoes() {
        let client = MockLlmClient::new("mock-model");
        let response = client
            .complete(CompletionRequest::new(vec![Message::user("ping")]))
            .await
            .unwrap();
        assert_eq!(response.content.as_deref(), Some("mock-echo: ping"));
    }
}
