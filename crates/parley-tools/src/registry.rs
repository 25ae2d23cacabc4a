//! Tool registry and dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, ToolError};
use crate::schema::validate_params;
use crate::traits::{Tool, ToolOutput, ToolSchema};

/// Registry of available tools.
///
/// Tools registered as `optional` are only enabled when they appear in the
/// configured allowlist; an absent allowlist enables all of them.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    optional: HashSet<String>,
    allowlist: Option<HashSet<String>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create an empty registry with no allowlist.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            optional: HashSet::new(),
            allowlist: None,
        }
    }

    /// Set the allowlist for optional tools. Blank entries are dropped; an
    /// empty list is treated as "no allowlist configured".
    pub fn with_allowlist<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let normalized: HashSet<String> = entries
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self.allowlist = if normalized.is_empty() {
            None
        } else {
            Some(normalized)
        };
        self
    }

    /// Register a tool.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool), false);
    }

    /// Register a tool gated by the optional-tools allowlist.
    pub fn register_optional<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool), true);
    }

    /// Register a shared tool instance.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>, optional: bool) {
        let name = tool.name().to_string();
        if optional {
            self.optional.insert(name.clone());
        } else {
            self.optional.remove(&name);
        }
        self.tools.insert(name, tool);
    }

    /// Remove a tool by name.
    pub fn unregister(&mut self, name: &str) {
        self.tools.remove(name);
        self.optional.remove(name);
    }

    fn is_enabled(&self, name: &str) -> bool {
        if !self.tools.contains_key(name) {
            return false;
        }
        if !self.optional.contains(name) {
            return true;
        }
        match &self.allowlist {
            None => true,
            Some(allowed) => allowed.contains(name),
        }
    }

    /// Get an enabled tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if !self.is_enabled(name) {
            return None;
        }
        self.tools.get(name).cloned()
    }

    /// Check whether a tool is registered and enabled.
    pub fn has(&self, name: &str) -> bool {
        self.is_enabled(name)
    }

    /// Names of all enabled tools.
    pub fn list(&self) -> Vec<&str> {
        self.tools
            .keys()
            .filter(|name| self.is_enabled(name.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Schemas of all enabled tools, for the model's tool listing.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .filter(|(name, _)| self.is_enabled(name.as_str()))
            .map(|(_, tool)| tool.schema())
            .collect()
    }

    /// Execute a tool with typed errors; used by callers that need to
    /// distinguish failure classes. Parameters are validated first.
    pub async fn execute(&self, name: &str, params: Value) -> Result<ToolOutput> {
        let Some(tool) = self.tools.get(name) else {
            return Err(ToolError::NotFound(name.to_string()));
        };
        if !self.is_enabled(name) {
            return Err(ToolError::Disabled(name.to_string()));
        }

        let violations = validate_params(&tool.parameters_schema(), &params);
        if !violations.is_empty() {
            return Err(ToolError::InvalidParams(violations.join("; ")));
        }

        tool.execute(params).await
    }

    /// Execute a tool and render the outcome as a string for the model.
    /// Every failure class becomes a readable `Error: ...` result; nothing
    /// escapes this boundary.
    pub async fn dispatch(&self, name: &str, params: Value) -> String {
        debug!(tool = %name, "Dispatching tool call");
        match self.execute(name, params).await {
            Ok(output) if output.success => match output.result {
                Value::String(text) => text,
                other => serde_json::to_string(&other).unwrap_or_default(),
            },
            Ok(output) => {
                let detail = output.error.unwrap_or_else(|| "tool failed".to_string());
                warn!(tool = %name, error = %detail, "Tool returned failure");
                format!("Error: {detail}")
            }
            Err(ToolError::NotFound(_)) => format!("Error: Tool '{name}' not found"),
            Err(ToolError::Disabled(_)) => format!("Error: Tool '{name}' is disabled"),
            Err(ToolError::InvalidParams(detail)) => {
                format!("Error: Invalid parameters for tool '{name}': {detail}")
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution error");
                format!("Error executing {name}: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo back the given text"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }

        async fn execute(&self, input: Value) -> Result<ToolOutput> {
            let text = input.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(ToolOutput::text(text))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _input: Value) -> Result<ToolOutput> {
            Err(ToolError::Execution("boom".to_string()))
        }
    }

    /// Records whether its body ever ran.
    struct TrackingTool(std::sync::Arc<std::sync::atomic::AtomicBool>);

    #[async_trait]
    impl Tool for TrackingTool {
        fn name(&self) -> &str {
            "tracking"
        }

        fn description(&self) -> &str {
            "Tracks invocations"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "count": { "type": "integer", "minimum": 1 }
                },
                "required": ["count"]
            })
        }

        async fn execute(&self, _input: Value) -> Result<ToolOutput> {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(ToolOutput::text("ran"))
        }
    }

    #[tokio::test]
    async fn dispatch_success_returns_plain_text() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let result = registry.dispatch("echo", json!({"text": "hi"})).await;
        assert_eq!(result, "hi");
    }

    #[tokio::test]
    async fn dispatch_unknown_tool() {
        let registry = ToolRegistry::new();
        let result = registry.dispatch("missing", json!({})).await;
        assert_eq!(result, "Error: Tool 'missing' not found");
    }

    #[tokio::test]
    async fn optional_tool_requires_allowlist() {
        let mut registry = ToolRegistry::new().with_allowlist(["other"]);
        registry.register_optional(EchoTool);

        assert!(!registry.has("echo"));
        let result = registry.dispatch("echo", json!({"text": "hi"})).await;
        assert_eq!(result, "Error: Tool 'echo' is disabled");
    }

    #[tokio::test]
    async fn optional_tool_enabled_when_allowlisted() {
        let mut registry = ToolRegistry::new().with_allowlist(["echo"]);
        registry.register_optional(EchoTool);
        assert!(registry.has("echo"));
        assert_eq!(registry.dispatch("echo", json!({"text": "ok"})).await, "ok");
    }

    #[tokio::test]
    async fn optional_tool_enabled_without_allowlist() {
        let mut registry = ToolRegistry::new();
        registry.register_optional(EchoTool);
        assert!(registry.has("echo"));
    }

    #[tokio::test]
    async fn invalid_params_never_reach_tool_body() {
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(TrackingTool(ran.clone()));

        let result = registry
            .dispatch("tracking", json!({"count": "three"}))
            .await;
        assert!(result.starts_with("Error: Invalid parameters for tool 'tracking'"));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));

        let result = registry.dispatch("tracking", json!({"count": 0})).await;
        assert!(result.contains(">= 1"));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn execution_error_becomes_result_string() {
        let mut registry = ToolRegistry::new();
        registry.register(FailingTool);
        let result = registry.dispatch("failing", json!({})).await;
        assert!(result.starts_with("Error executing failing:"));
        assert!(result.contains("boom"));
    }

    #[tokio::test]
    async fn schemas_exclude_disabled_tools() {
        let mut registry = ToolRegistry::new().with_allowlist(["nothing"]);
        registry.register(FailingTool);
        registry.register_optional(EchoTool);

        let schemas = registry.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "failing");
    }
}
