//! Parley execution core.
//!
//! Accepts conversational run submissions, guarantees single-flight
//! execution per session with a bounded FIFO queue behind it, drives the
//! model/tool iteration loop with provider fallback and cooldown, and
//! reports exactly one terminal event per admitted run.
//!
//! # Structure
//!
//! - [`lanes`]: admission control and per-session FIFO scheduling
//! - [`engine`]: the bounded model/tool loop
//! - [`llm`]: model client seam, scripted mock, fallback router
//! - [`coordinator`]: run spawning, aborts, terminal event delivery
//!
//! Channel adapters, prompt assembly, provider wiring, and configuration
//! loading are collaborators of the embedding application, reached through
//! the [`llm::ClientFactory`] and tool-registry seams.

pub mod abort;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod lanes;
pub mod llm;
pub mod run;

pub use abort::AbortSignal;
pub use coordinator::{Coordinator, RunEvent};
pub use engine::{DEFAULT_MAX_ITERATIONS, EngineConfig, ExecutionEngine};
pub use error::{CoreError, Result};
pub use lanes::{
    Admission, DEFAULT_MAX_PENDING, LaneReport, LaneScheduler, LaneStatus, LaneSummary,
};
pub use llm::{
    ClientFactory, CompletionRequest, CompletionResponse, FallbackRouter, FinishReason, LlmClient,
    LlmError, Message, MockLlmClient, MockStep, Role, StaticClientFactory, ToolCall,
};
pub use run::{Run, RunOutcome, RunStatus, SubmitAck, SubmitRequest};
