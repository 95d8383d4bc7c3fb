//! Git access for agents, restricted to a fixed set of subcommands

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use arbor_core::{ArborError, Result};

use crate::shell::{format_output, run_process};
use crate::tool::{parse_input, Tool, ToolContext, ToolOutput};

pub struct GitTool;

/// Git ref for a node's branch
///
/// Tree branches nest (`arbor/<root>/0/1`), which git cannot store next to
/// `arbor/<root>`, so nesting below the root is flattened with dots.
fn git_ref_name(branch: &str) -> String {
    match branch.split_once('/') {
        Some((prefix, rest)) => format!("{}/{}", prefix, rest.replace('/', ".")),
        None => branch.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct GitArgs {
    subcommand: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    limit: Option<u32>,
}

impl GitArgs {
    /// Build the git argument list; the bool marks subcommands that change state
    ///
    /// `checkout` without a branch goes to the node's own branch.
    fn command_line(&self, own_branch: Option<&str>) -> Result<(Vec<String>, bool)> {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        match self.subcommand.as_str() {
            "status" => Ok((owned(&["status", "--short", "--branch"]), false)),
            "diff" => {
                let mut args = owned(&["diff", "--stat", "--patch"]);
                if !self.paths.is_empty() {
                    args.push("--".to_string());
                    args.extend(self.paths.iter().cloned());
                }
                Ok((args, false))
            }
            "log" => {
                let limit = self.limit.unwrap_or(20).clamp(1, 200);
                Ok((vec!["log".into(), "--oneline".into(), format!("-n{}", limit)], false))
            }
            "branch" => match &self.branch {
                Some(name) => Ok((vec!["branch".into(), name.clone()], true)),
                None => Ok((owned(&["branch", "--list"]), false)),
            },
            "checkout" => {
                let name = self.branch.as_deref().or(own_branch).ok_or_else(|| {
                    ArborError::InvalidInput("git checkout requires 'branch'".to_string())
                })?;
                Ok((vec!["checkout".into(), name.to_string()], true))
            }
            "add" => {
                if self.paths.is_empty() {
                    return Err(ArborError::InvalidInput("git add requires 'paths'".to_string()));
                }
                let mut args = vec!["add".to_string(), "--".to_string()];
                args.extend(self.paths.iter().cloned());
                Ok((args, true))
            }
            "commit" => {
                let message = self.message.as_ref().filter(|m| !m.trim().is_empty()).ok_or_else(|| {
                    ArborError::InvalidInput("git commit requires a non-empty 'message'".to_string())
                })?;
                Ok((vec!["commit".into(), "-m".into(), message.clone()], true))
            }
            other => Err(ArborError::InvalidInput(format!(
                "Unsupported git subcommand '{}'. Use status, diff, log, branch, checkout, add or commit.",
                other
            ))),
        }
    }
}

#[async_trait]
impl Tool for GitTool {
    fn name(&self) -> &str {
        "git"
    }

    fn description(&self) -> &str {
        "Run a git subcommand in the working directory: status, diff, log, branch, checkout, add, commit."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subcommand": {
                    "type": "string",
                    "enum": ["status", "diff", "log", "branch", "checkout", "add", "commit"]
                },
                "branch": {"type": "string", "description": "Branch for branch/checkout; checkout defaults to this agent's branch"},
                "message": {"type": "string", "description": "Commit message"},
                "paths": {"type": "array", "items": {"type": "string"}},
                "limit": {"type": "integer", "description": "Number of log entries"}
            },
            "required": ["subcommand"]
        })
    }

    async fn execute(&self, input: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: GitArgs = parse_input(self.name(), input)?;
        let own_branch = Some(git_ref_name(&ctx.branch)).filter(|b| !b.is_empty());
        let (mut argv, mutating) = args.command_line(own_branch.as_deref())?;

        if mutating && ctx.dry_run {
            info!(args = ?argv, "[dry-run] would run git");
            return Ok(ToolOutput::text(format!("[dry-run] would run: git {}", argv.join(" "))));
        }

        // The node's own branch is created on first checkout
        if let (Some(own), "checkout", None) = (&own_branch, args.subcommand.as_str(), &args.branch) {
            let reference = format!("refs/heads/{}", own);
            let exists = run_process(
                &ctx.working_directory,
                "git",
                &["rev-parse", "--verify", "--quiet", reference.as_str()],
            )
            .await?
            .status
            .success();
            if !exists {
                argv.insert(1, "-b".to_string());
            }
        }

        let refs: Vec<&str> = argv.iter().map(String::as_str).collect();
        let output = run_process(&ctx.working_directory, "git", &refs).await?;
        let text = format_output(&output);

        if output.status.success() {
            Ok(ToolOutput::text(text))
        } else {
            Ok(ToolOutput::failure(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::AgentId;
    use tempfile::TempDir;

    fn args(value: Value) -> GitArgs {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_command_lines() {
        let (argv, mutating) = args(json!({"subcommand": "status"})).command_line(None).unwrap();
        assert_eq!(argv, vec!["status", "--short", "--branch"]);
        assert!(!mutating);

        let (argv, mutating) = args(json!({"subcommand": "commit", "message": "feat: x"}))
            .command_line(None)
            .unwrap();
        assert_eq!(argv, vec!["commit", "-m", "feat: x"]);
        assert!(mutating);

        let (argv, _) = args(json!({"subcommand": "log", "limit": 5})).command_line(None).unwrap();
        assert_eq!(argv, vec!["log", "--oneline", "-n5"]);
    }

    #[test]
    fn test_rejects_unsupported_and_incomplete() {
        assert!(args(json!({"subcommand": "push"})).command_line(None).is_err());
        assert!(args(json!({"subcommand": "checkout"})).command_line(None).is_err());
        assert!(args(json!({"subcommand": "commit", "message": " "}))
            .command_line(None)
            .is_err());
    }

    #[test]
    fn test_checkout_defaults_to_own_branch() {
        let (argv, mutating) = args(json!({"subcommand": "checkout"}))
            .command_line(Some("arbor/1a2b3c4d/0"))
            .unwrap();
        assert_eq!(argv, vec!["checkout", "arbor/1a2b3c4d/0"]);
        assert!(mutating);

        let (argv, _) = args(json!({"subcommand": "checkout", "branch": "main"}))
            .command_line(Some("arbor/1a2b3c4d/0"))
            .unwrap();
        assert_eq!(argv, vec!["checkout", "main"]);
    }

    #[tokio::test]
    async fn test_dry_run_skips_mutating_subcommands() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(AgentId::new(), dir.path()).with_dry_run(true);

        let out = GitTool
            .execute(&json!({"subcommand": "branch", "branch": "feature"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.content, "[dry-run] would run: git branch feature");

        let ctx = ctx.with_branch("arbor/1a2b3c4d/0");
        let out = GitTool
            .execute(&json!({"subcommand": "checkout"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.content, "[dry-run] would run: git checkout arbor/1a2b3c4d.0");
    }

    #[test]
    fn test_nested_branches_flatten_below_root() {
        assert_eq!(git_ref_name("arbor/1a2b3c4d"), "arbor/1a2b3c4d");
        assert_eq!(git_ref_name("arbor/1a2b3c4d/0/2"), "arbor/1a2b3c4d.0.2");
        assert_eq!(git_ref_name(""), "");
    }
}
