//! Shell execution tool.
//!
//! Commands pass a safety guard before reaching the sandbox service:
//! - deny patterns catch destructive commands (rm -rf, mkfs, dd to raw
//!   devices, fork bombs, power control);
//! - allow patterns, when configured, switch the guard to allowlist mode;
//! - with `restrict_to_workspace` and shell mode off, shell metacharacters
//!   are rejected outright, which blocks redirection, substitution,
//!   subshells, and chaining before tokenization even happens;
//! - with `restrict_to_workspace`, path traversal and absolute paths outside
//!   the workspace are rejected in any mode.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use parley_sandbox::{ExecOutcome, ExecRequest, SandboxError, SandboxService};

use crate::error::Result;
use crate::traits::{Tool, ToolOutput};

/// Cap on rendered output length.
const DEFAULT_MAX_OUTPUT_LEN: usize = 10_000;

static DEFAULT_DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\bdel\s+/[fq]\b",
    r"\brmdir\s+/s\b",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:",
];

static SHELL_METACHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[|&;<>()`$]").expect("static pattern"));

/// Absolute POSIX paths appearing in a command line.
static ABSOLUTE_PATHS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:^|[\s|>])(/[^\s"'>]+)"#).expect("static pattern"));

fn compile_patterns(patterns: &[impl AsRef<str>]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(p.as_ref()).ok())
        .collect()
}

/// Tool that executes shell commands through the sandbox service.
pub struct ExecTool {
    service: Arc<SandboxService>,
    workspace: PathBuf,
    restrict_to_workspace: bool,
    deny_patterns: Vec<Regex>,
    allow_patterns: Vec<Regex>,
    max_output_len: usize,
}

impl ExecTool {
    pub fn new(service: Arc<SandboxService>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            service,
            workspace: workspace.into(),
            restrict_to_workspace: false,
            deny_patterns: compile_patterns(DEFAULT_DENY_PATTERNS),
            allow_patterns: Vec::new(),
            max_output_len: DEFAULT_MAX_OUTPUT_LEN,
        }
    }

    /// Confine working directories and command paths to the workspace.
    pub fn with_restrict_to_workspace(mut self, restrict: bool) -> Self {
        self.restrict_to_workspace = restrict;
        self
    }

    /// Replace the deny pattern set.
    pub fn with_deny_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let collected: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();
        self.deny_patterns = compile_patterns(&collected);
        self
    }

    /// Enable allowlist mode: only matching commands run.
    pub fn with_allow_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let collected: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();
        self.allow_patterns = compile_patterns(&collected);
        self
    }

    /// Set the rendered-output cap.
    pub fn with_max_output_len(mut self, len: usize) -> Self {
        self.max_output_len = len;
        self
    }

    /// Best-effort safety guard. Returns a block message, or `None` when the
    /// command may proceed.
    fn guard_command(&self, command: &str, cwd: &Path) -> Option<String> {
        let cmd = command.trim();
        let lower = cmd.to_lowercase();

        for pattern in &self.deny_patterns {
            if pattern.is_match(&lower) {
                return Some(
                    "Command blocked by safety guard (dangerous pattern detected)".to_string(),
                );
            }
        }

        if !self.allow_patterns.is_empty()
            && !self.allow_patterns.iter().any(|p| p.is_match(&lower))
        {
            return Some("Command blocked by safety guard (not in allowlist)".to_string());
        }

        if !self.restrict_to_workspace {
            return None;
        }

        if !self.service.policy().shell_mode && SHELL_METACHARS.is_match(cmd) {
            return Some(
                "Command blocked by safety guard (shell metacharacters are not allowed)"
                    .to_string(),
            );
        }

        if cmd.contains("../") || cmd.contains("..\\") {
            return Some("Command blocked by safety guard (path traversal detected)".to_string());
        }

        if !cwd.starts_with(&self.workspace) {
            return Some(
                "Command blocked by safety guard (working_dir outside allowed root)".to_string(),
            );
        }

        for capture in ABSOLUTE_PATHS.captures_iter(cmd) {
            let Some(raw) = capture.get(1) else { continue };
            let path = Path::new(raw.as_str().trim());
            if !path.starts_with(&self.workspace) {
                return Some(
                    "Command blocked by safety guard (path outside working dir)".to_string(),
                );
            }
        }

        None
    }
}

/// Render an execution outcome the way the model expects to read it:
/// stdout, then a labeled stderr section, then the exit code when nonzero,
/// truncated to a cap, with the fallback note appended last.
pub(crate) fn render_outcome(outcome: &ExecOutcome, max_len: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !outcome.stdout.is_empty() {
        parts.push(outcome.stdout.clone());
    }
    if !outcome.stderr.trim().is_empty() {
        parts.push(format!("STDERR:\n{}", outcome.stderr));
    }
    if outcome.exit_code != 0 {
        parts.push(format!("\nExit code: {}", outcome.exit_code));
    }

    let mut result = if parts.is_empty() {
        "(no output)".to_string()
    } else {
        parts.join("\n")
    };

    if result.len() > max_len {
        let overflow = result.len() - max_len;
        let cut = (0..=max_len)
            .rev()
            .find(|&i| result.is_char_boundary(i))
            .unwrap_or(0);
        result.truncate(cut);
        result.push_str(&format!("\n... (truncated, {overflow} more chars)"));
    }

    if let Some(reason) = &outcome.fallback_reason {
        result = format!("{}\n[Sandbox fallback: {reason}]", result.trim_end());
    }

    result
}

#[derive(Debug, Deserialize)]
struct ExecInput {
    command: String,
    #[serde(default)]
    working_dir: Option<String>,
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. Use with caution."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Optional working directory for the command"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let input: ExecInput = serde_json::from_value(input)?;
        let cwd = input
            .working_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| self.workspace.clone());

        if let Some(block) = self.guard_command(&input.command, &cwd) {
            info!(command = %input.command, "Command blocked by guard");
            return Ok(ToolOutput::error(block));
        }

        match self.service.run(ExecRequest::new(&input.command, cwd)).await {
            Ok(outcome) => Ok(ToolOutput::text(render_outcome(
                &outcome,
                self.max_output_len,
            ))),
            Err(SandboxError::Timeout(secs)) => Ok(ToolOutput::error(format!(
                "Command timed out after {secs} seconds"
            ))),
            Err(e) => Ok(ToolOutput::error(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_sandbox::{Backend, ExecPolicy};

    fn tool_with(policy: ExecPolicy) -> (ExecTool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(SandboxService::new(policy));
        let tool = ExecTool::new(service, dir.path());
        (tool, dir)
    }

    fn restricted_tool() -> (ExecTool, tempfile::TempDir) {
        let (tool, dir) = tool_with(ExecPolicy::default());
        (tool.with_restrict_to_workspace(true), dir)
    }

    #[test]
    fn guard_blocks_dangerous_patterns() {
        let (tool, dir) = tool_with(ExecPolicy::default());
        for cmd in ["rm -rf /", "sudo reboot", "dd if=/dev/zero of=/dev/sda"] {
            let block = tool.guard_command(cmd, dir.path());
            assert!(block.is_some(), "expected {cmd:?} to be blocked");
            assert!(block.unwrap().contains("dangerous pattern"));
        }
    }

    #[test]
    fn guard_allowlist_mode() {
        let (tool, dir) = tool_with(ExecPolicy::default());
        let tool = tool.with_allow_patterns([r"^git\b", r"^cargo\b"]);
        assert!(tool.guard_command("git status", dir.path()).is_none());
        assert!(
            tool.guard_command("curl http://example.com", dir.path())
                .unwrap()
                .contains("not in allowlist")
        );
    }

    #[test]
    fn guard_blocks_metacharacters_when_restricted() {
        let (tool, dir) = restricted_tool();
        let block = tool.guard_command("echo hi > out.txt", dir.path()).unwrap();
        assert!(block.contains("shell metacharacters"));
        assert!(tool.guard_command("echo hi", dir.path()).is_none());
    }

    #[test]
    fn guard_allows_metacharacters_in_shell_mode() {
        let (tool, dir) = tool_with(ExecPolicy::default().with_shell_mode(true));
        let tool = tool.with_restrict_to_workspace(true);
        assert!(tool.guard_command("echo hi | wc -c", dir.path()).is_none());
    }

    #[test]
    fn guard_blocks_traversal_and_outside_paths() {
        let (tool, dir) = restricted_tool();
        assert!(
            tool.guard_command("cat ../secrets", dir.path())
                .unwrap()
                .contains("path traversal")
        );
        assert!(
            tool.guard_command("cat /etc/passwd", dir.path())
                .unwrap()
                .contains("path outside working dir")
        );
        assert!(
            tool.guard_command("ls", Path::new("/somewhere/else"))
                .unwrap()
                .contains("working_dir outside allowed root")
        );
    }

    #[test]
    fn guard_accepts_relative_paths() {
        let (tool, dir) = restricted_tool();
        assert!(
            tool.guard_command("cat .venv/bin/python", dir.path())
                .is_none()
        );
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn execute_returns_command_output() {
        let (tool, _dir) = tool_with(ExecPolicy::default());
        let output = tool
            .execute(serde_json::json!({"command": "echo hello"}))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.result, serde_json::json!("hello\n"));
    }

    #[tokio::test]
    async fn execute_blocks_before_running() {
        let (tool, _dir) = tool_with(ExecPolicy::default());
        let output = tool
            .execute(serde_json::json!({"command": "rm -rf /tmp/x"}))
            .await
            .unwrap();
        assert!(!output.success);
        assert!(output.error.unwrap().contains("safety guard"));
    }

    #[test]
    fn render_includes_stderr_and_exit_code() {
        let outcome = ExecOutcome {
            stdout: "out\n".to_string(),
            stderr: "bad\n".to_string(),
            exit_code: 2,
            backend: Backend::Direct,
            fallback_reason: None,
            duration_ms: 1,
        };
        let rendered = render_outcome(&outcome, 10_000);
        assert!(rendered.contains("out"));
        assert!(rendered.contains("STDERR:\nbad"));
        assert!(rendered.contains("Exit code: 2"));
    }

    #[test]
    fn render_truncates_long_output() {
        let outcome = ExecOutcome {
            stdout: "x".repeat(50),
            stderr: String::new(),
            exit_code: 0,
            backend: Backend::Direct,
            fallback_reason: None,
            duration_ms: 1,
        };
        let rendered = render_outcome(&outcome, 10);
        assert!(rendered.starts_with("xxxxxxxxxx\n... (truncated"));
    }

    #[test]
    fn render_appends_fallback_note() {
        let outcome = ExecOutcome {
            stdout: "hello\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
            backend: Backend::Direct,
            fallback_reason: Some("container runtime unavailable; ran directly".to_string()),
            duration_ms: 1,
        };
        let rendered = render_outcome(&outcome, 10_000);
        assert!(rendered.ends_with("[Sandbox fallback: container runtime unavailable; ran directly]"));
    }

    #[test]
    fn render_empty_output() {
        let outcome = ExecOutcome {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            backend: Backend::Sandbox,
            fallback_reason: None,
            duration_ms: 1,
        };
        assert_eq!(render_outcome(&outcome, 10_000), "(no output)");
    }
}
