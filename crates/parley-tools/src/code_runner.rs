//! Code snippet execution tool.
//!
//! Writes the snippet into the workspace (so both backends see it at the
//! same relative path) and runs the matching interpreter through the
//! sandbox service. The snippet file is removed afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use parley_sandbox::{ExecRequest, SandboxError, SandboxService};

use crate::error::Result;
use crate::exec::render_outcome;
use crate::traits::{Tool, ToolOutput};

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const MIN_TIMEOUT_SECS: u64 = 60;
const MAX_TIMEOUT_SECS: u64 = 600;
const MAX_OUTPUT_LEN: usize = 10_000;

/// Directory under the workspace where snippets are staged.
const SNIPPET_DIR: &str = ".parley/snippets";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Python,
    Node,
    Sh,
}

impl Language {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "python" => Some(Self::Python),
            "node" => Some(Self::Node),
            "sh" => Some(Self::Sh),
            _ => None,
        }
    }

    fn interpreter(self) -> &'static str {
        match self {
            Self::Python => "python3",
            Self::Node => "node",
            Self::Sh => "sh",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::Node => "js",
            Self::Sh => "sh",
        }
    }
}

/// Tool that runs a code snippet via the sandbox service.
pub struct CodeRunnerTool {
    service: Arc<SandboxService>,
    workspace: PathBuf,
    default_timeout_secs: u64,
}

impl CodeRunnerTool {
    pub fn new(service: Arc<SandboxService>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            service,
            workspace: workspace.into(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Set the default timeout (clamped to the declared minimum).
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs.max(MIN_TIMEOUT_SECS);
        self
    }
}

#[derive(Debug, Deserialize)]
struct CodeInput {
    code: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[async_trait]
impl Tool for CodeRunnerTool {
    fn name(&self) -> &str {
        "code_runner"
    }

    fn description(&self) -> &str {
        "Run a code snippet (python, node, or sh) in the agent workspace and return its output."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The code snippet to run"
                },
                "language": {
                    "type": "string",
                    "description": "Snippet language",
                    "enum": ["python", "node", "sh"]
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds",
                    "minimum": MIN_TIMEOUT_SECS,
                    "maximum": MAX_TIMEOUT_SECS
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let input: CodeInput = serde_json::from_value(input)?;
        if input.code.trim().is_empty() {
            return Ok(ToolOutput::error("code is required"));
        }
        let language = match input.language.as_deref() {
            None => Language::Python,
            Some(raw) => match Language::parse(raw) {
                Some(language) => language,
                None => {
                    return Ok(ToolOutput::error(format!(
                        "Unknown language '{raw}'. Supported: python, node, sh."
                    )));
                }
            },
        };
        let timeout_secs = input
            .timeout
            .filter(|t| (MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(t))
            .unwrap_or(self.default_timeout_secs);

        let snippet_rel = format!(
            "{SNIPPET_DIR}/run-{}.{}",
            uuid::Uuid::new_v4().simple(),
            language.extension()
        );
        let snippet_abs = self.workspace.join(&snippet_rel);
        if let Some(parent) = snippet_abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&snippet_abs, &input.code).await?;
        debug!(snippet = %snippet_rel, interpreter = language.interpreter(), "Running code snippet");

        let command = format!("{} {snippet_rel}", language.interpreter());
        let request = ExecRequest::new(command, &self.workspace)
            .with_timeout_secs(timeout_secs)
            .with_label("code");
        let result = self.service.run(request).await;

        // The snippet is one-shot, like the context that ran it.
        let _ = tokio::fs::remove_file(&snippet_abs).await;

        match result {
            Ok(outcome) => Ok(ToolOutput::text(render_outcome(&outcome, MAX_OUTPUT_LEN))),
            Err(SandboxError::Timeout(secs)) => Ok(ToolOutput::error(format!(
                "Code execution timed out after {secs} seconds"
            ))),
            Err(e) => Ok(ToolOutput::error(e.to_string())),
        }
    }
}
