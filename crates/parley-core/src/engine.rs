//! Bounded execution loop: call the model, run requested tools, repeat.
//!
//! The loop suspends at exactly two places (the model call and tool
//! dispatch), and both are raced against the run's abort signal, which
//! keeps cancellation observable even while a tool is blocked. Tool
//! results are appended in request order.

use std::sync::Arc;

use tracing::{debug, info};

use parley_tools::ToolRegistry;

use crate::abort::AbortSignal;
use crate::llm::{CompletionRequest, FallbackRouter, Message};
use crate::run::{Run, RunOutcome};

/// Default iteration budget per run.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// User prompt appended after a round of tool results.
pub const DEFAULT_FOLLOWUP_PROMPT: &str = "Summarize the tool results briefly for the user \
     (1-4 sentences). If the task is done, give the outcome; if more steps are needed, state \
     the next action only.";

/// Loop configuration, owned by the embedding application's config layer.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_iterations: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    /// Appended as a user message after tool results; `None` disables it.
    pub followup_prompt: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            temperature: None,
            max_tokens: None,
            system_prompt: None,
            followup_prompt: Some(DEFAULT_FOLLOWUP_PROMPT.to_string()),
        }
    }
}

impl EngineConfig {
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn without_followup_prompt(mut self) -> Self {
        self.followup_prompt = None;
        self
    }
}

/// Drives one run through the model/tool iteration loop.
pub struct ExecutionEngine {
    router: Arc<FallbackRouter>,
    tools: Arc<ToolRegistry>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(router: Arc<FallbackRouter>, tools: Arc<ToolRegistry>, config: EngineConfig) -> Self {
        Self {
            router,
            tools,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a run to its terminal outcome. Never panics on model or tool
    /// failure; those become the run's terminal state.
    pub async fn run(&self, run: &Run, abort: Arc<AbortSignal>) -> RunOutcome {
        let mut messages = Vec::new();
        if let Some(system) = &self.config.system_prompt {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(&run.message));
        info!(run_id = %run.run_id, session_key = %run.session_key, "Run loop starting");
        self.run_loop(&run.run_id, messages, abort).await
    }

    async fn run_loop(
        &self,
        run_id: &str,
        mut messages: Vec<Message>,
        abort: Arc<AbortSignal>,
    ) -> RunOutcome {
        let mut iterations = 0usize;
        let mut last_content: Option<String> = None;

        while iterations < self.config.max_iterations {
            if abort.is_aborted() {
                info!(run_id, iterations, "Abort observed between iterations");
                return RunOutcome::aborted(iterations);
            }
            iterations += 1;

            let mut request =
                CompletionRequest::new(messages.clone()).with_tools(self.tools.schemas());
            if let Some(temperature) = self.config.temperature {
                request = request.with_temperature(temperature);
            }
            if let Some(max_tokens) = self.config.max_tokens {
                request = request.with_max_tokens(max_tokens);
            }

            debug!(run_id, iteration = iterations, "Calling model");
            let completion = tokio::select! {
                _ = abort.cancelled() => {
                    info!(run_id, iterations, "Abort observed during model call");
                    return RunOutcome::aborted(iterations);
                }
                result = self.router.complete(request) => result,
            };
            let (response, model) = match completion {
                Ok(ok) => ok,
                Err(e) => {
                    info!(run_id, iterations, error = %e, "Run failed on model call");
                    return RunOutcome::failed(e.to_string(), iterations);
                }
            };

            if response.tool_calls.is_empty() {
                let answer = response.content.unwrap_or_default();
                info!(run_id, iterations, model = %model, "Run completed");
                return RunOutcome::finished(answer, iterations);
            }

            if let Some(content) = &response.content
                && !content.trim().is_empty()
            {
                last_content = Some(content.clone());
            }
            messages.push(Message::assistant_with_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                if abort.is_aborted() {
                    return RunOutcome::aborted(iterations);
                }
                debug!(run_id, tool = %call.name, call_id = %call.id, "Dispatching tool call");
                // Dropping the dispatch future tears down any kill_on_drop
                // subprocess behind it.
                let result = tokio::select! {
                    _ = abort.cancelled() => {
                        info!(run_id, tool = %call.name, "Abort observed during tool call");
                        return RunOutcome::aborted(iterations);
                    }
                    result = self.tools.dispatch(&call.name, call.arguments.clone()) => result,
                };
                messages.push(Message::tool_result(call.id.clone(), result));
            }

            if let Some(followup) = &self.config.followup_prompt {
                messages.push(Message::user(followup));
            }
        }

        info!(
            run_id,
            iterations, "Iteration budget exhausted, returning capped result"
        );
        RunOutcome::capped(last_content, iterations)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use parley_tools::{Tool, ToolOutput, ToolRegistry};

    use super::*;
    use crate::llm::{MockLlmClient, MockStep, StaticClientFactory};
    use crate::run::{RunStatus, SubmitRequest};

    struct UppercaseTool;

    #[async_trait]
    impl Tool for UppercaseTool {
        fn name(&self) -> &str {
            "uppercase"
        }

        fn description(&self) -> &str {
            "Uppercase the given text"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        async fn execute(&self, input: Value) -> parley_tools::error::Result<ToolOutput> {
            let text = input.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(ToolOutput::text(text.to_uppercase()))
        }
    }

    /// Sleeps long enough that only an abort can end it.
    struct StallTool;

    #[async_trait]
    impl Tool for StallTool {
        fn name(&self) -> &str {
            "stall"
        }

        fn description(&self) -> &str {
            "Blocks for a long time"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _input: Value) -> parley_tools::error::Result<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolOutput::text("unreachable"))
        }
    }

    fn engine_with(client: MockLlmClient, tools: ToolRegistry) -> ExecutionEngine {
        let factory = StaticClientFactory::new().insert("m1", Arc::new(client));
        let router = Arc::new(FallbackRouter::new("m1", vec![], Arc::new(factory)));
        ExecutionEngine::new(router, Arc::new(tools), EngineConfig::default())
    }

    fn tools() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(UppercaseTool);
        registry.register(StallTool);
        registry
    }

    fn test_run(message: &str) -> Run {
        let mut run = Run::new(&SubmitRequest::new("s1", "main", message));
        run.start();
        run
    }

    #[tokio::test]
    async fn completes_without_tool_calls() {
        let client = MockLlmClient::from_steps("m1", vec![MockStep::text("plain answer")]);
        let engine = engine_with(client, tools());

        let outcome = engine.run(&test_run("hi"), AbortSignal::new()).await;
        assert_eq!(outcome.status, RunStatus::Final);
        assert_eq!(outcome.content.as_deref(), Some("plain answer"));
        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.iteration_capped);
    }

    #[tokio::test]
    async fn executes_tool_then_finishes() {
        let client = MockLlmClient::from_steps(
            "m1",
            vec![
                MockStep::tool_call("c1", "uppercase", json!({"text": "hello"})),
                MockStep::text("done: HELLO"),
            ],
        );
        let engine = engine_with(client, tools());

        let outcome = engine.run(&test_run("shout"), AbortSignal::new()).await;
        assert_eq!(outcome.status, RunStatus::Final);
        assert_eq!(outcome.content.as_deref(), Some("done: HELLO"));
        assert_eq!(outcome.iterations, 2);
    }

    #[tokio::test]
    async fn tool_failure_feeds_back_into_the_loop() {
        let client = MockLlmClient::from_steps(
            "m1",
            vec![
                MockStep::tool_call("c1", "no_such_tool", json!({})),
                MockStep::text("recovered"),
            ],
        );
        let engine = engine_with(client, tools());

        let outcome = engine.run(&test_run("try"), AbortSignal::new()).await;
        // The unknown tool became an error result, not a crash.
        assert_eq!(outcome.status, RunStatus::Final);
        assert_eq!(outcome.content.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn iteration_budget_caps_the_loop() {
        let steps: Vec<MockStep> = (0..10)
            .map(|i| MockStep::tool_call(format!("c{i}"), "uppercase", json!({"text": "x"})))
            .collect();
        let client = MockLlmClient::from_steps("m1", steps);
        let factory = StaticClientFactory::new().insert("m1", Arc::new(client));
        let router = Arc::new(FallbackRouter::new("m1", vec![], Arc::new(factory)));
        let engine = ExecutionEngine::new(
            router,
            Arc::new(tools()),
            EngineConfig::default().with_max_iterations(3),
        );

        let outcome = engine.run(&test_run("loop"), AbortSignal::new()).await;
        assert_eq!(outcome.status, RunStatus::Final);
        assert_eq!(outcome.iterations, 3);
        assert!(outcome.iteration_capped);
    }

    #[tokio::test]
    async fn model_exhaustion_is_terminal() {
        let client = MockLlmClient::from_steps("m1", vec![MockStep::error("rate limit")]);
        let engine = engine_with(client, tools());

        let outcome = engine.run(&test_run("hi"), AbortSignal::new()).await;
        assert_eq!(outcome.status, RunStatus::Error);
        assert!(outcome.error.unwrap().contains("models failed"));
    }

    #[tokio::test]
    async fn abort_before_first_iteration() {
        let client = MockLlmClient::from_steps("m1", vec![MockStep::text("never")]);
        let engine = engine_with(client, tools());
        let abort = AbortSignal::new();
        abort.abort();

        let outcome = engine.run(&test_run("hi"), abort).await;
        assert_eq!(outcome.status, RunStatus::Aborted);
        assert_eq!(outcome.iterations, 0);
    }

    #[tokio::test]
    async fn abort_interrupts_blocked_tool_call() {
        let client = MockLlmClient::from_steps(
            "m1",
            vec![MockStep::tool_call("c1", "stall", json!({}))],
        );
        let engine = engine_with(client, tools());
        let abort = AbortSignal::new();

        let abort_trigger = {
            let abort = Arc::clone(&abort);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                abort.abort();
            })
        };

        let started = std::time::Instant::now();
        let outcome = engine.run(&test_run("stall"), abort).await;
        abort_trigger.await.unwrap();

        assert_eq!(outcome.status, RunStatus::Aborted);
        // Bounded grace: nowhere near the tool's 30s sleep.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn followup_prompt_is_appended_after_tool_results() {
        // The second completion is the script-exhausted echo of the last
        // user message, which is the follow-up prompt itself.
        let client = MockLlmClient::from_steps(
            "m1",
            vec![MockStep::tool_call("c1", "uppercase", json!({"text": "a"}))],
        );
        let engine = engine_with(client, tools());

        let outcome = engine.run(&test_run("go"), AbortSignal::new()).await;
        assert_eq!(outcome.status, RunStatus::Final);
        assert!(
            outcome
                .content
                .unwrap()
                .contains("Summarize the tool results")
        );
    }
}
