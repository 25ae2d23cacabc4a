//! Model seam: client trait, scripted mock, and fallback routing.

pub mod client;
pub mod fallback;
pub mod mock;

pub use client::{
    ClientFactory, CompletionRequest, CompletionResponse, FinishReason, LlmClient, LlmError,
    LlmResult, Message, Role, StaticClientFactory, TokenUsage, ToolCall,
};
pub use fallback::FallbackRouter;
pub use mock::{MockLlmClient, MockStep, MockStepKind};
