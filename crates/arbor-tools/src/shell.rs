//! Shell command execution

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};

use arbor_core::{ArborError, Result};

use crate::tool::{parse_input, truncate, Tool, ToolContext, ToolOutput};

const MAX_STREAM_BYTES: usize = 8_000;

/// Run `program args...` in `dir`; the child is killed if the future is dropped
pub(crate) async fn run_process(dir: &Path, program: &str, args: &[&str]) -> Result<Output> {
    debug!(program, ?args, dir = %dir.display(), "Running process");
    Command::new(program)
        .args(args)
        .current_dir(dir)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ArborError::ToolExecution {
            tool: program.to_string(),
            message: format!("failed to start: {}", e),
        })
}

/// Render exit status plus trimmed streams
pub(crate) fn format_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let code = output
        .status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());

    let mut text = format!("exit: {}", code);
    if !stdout.trim().is_empty() {
        text.push_str(&format!("\n\nSTDOUT:\n{}", truncate(stdout.trim(), MAX_STREAM_BYTES)));
    }
    if !stderr.trim().is_empty() {
        text.push_str(&format!("\n\nSTDERR:\n{}", truncate(stderr.trim(), MAX_STREAM_BYTES)));
    }
    text
}

pub struct RunCommandTool;

#[derive(Deserialize)]
struct RunArgs {
    command: String,
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command (sh -c) in the working directory. Output is truncated."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command line"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: RunArgs = parse_input(self.name(), input)?;
        if args.command.trim().is_empty() {
            return Err(ArborError::InvalidInput("run_command: empty command".to_string()));
        }

        if ctx.dry_run {
            info!(command = %args.command, "[dry-run] would run command");
            return Ok(ToolOutput::text(format!("[dry-run] would run: {}", args.command)));
        }

        let output = run_process(&ctx.working_directory, "sh", &["-c", &args.command]).await?;
        let text = format_output(&output);
        let data = json!({ "exit_code": output.status.code() });

        if output.status.success() {
            Ok(ToolOutput::text(text).with_data(data))
        } else {
            Ok(ToolOutput::failure(text).with_data(data))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::AgentId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_runs_in_working_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let ctx = ToolContext::new(AgentId::new(), dir.path());

        let out = RunCommandTool
            .execute(&json!({"command": "ls"}), &ctx)
            .await
            .unwrap();
        assert!(!out.is_error);
        assert!(out.content.contains("marker.txt"));
        assert!(out.content.starts_with("exit: 0"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_flagged() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(AgentId::new(), dir.path());

        let out = RunCommandTool
            .execute(&json!({"command": "echo broken >&2; exit 3"}), &ctx)
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("exit: 3"));
        assert!(out.content.contains("broken"));
    }

    #[tokio::test]
    async fn test_dry_run_skips_execution() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(AgentId::new(), dir.path()).with_dry_run(true);

        RunCommandTool
            .execute(&json!({"command": "touch made.txt"}), &ctx)
            .await
            .unwrap();
        assert!(!dir.path().join("made.txt").exists());
    }
}
