//! Command-backed completion gate
//!
//! Runs the configured compile command first. If it fails, the decision is
//! blocked immediately and no other check runs. Otherwise each configured
//! check runs in order and its failures are reported at the check's severity.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use arbor_core::config::{ArborConfig, CheckSpec, GateConfig};
use arbor_core::{Severity, Specialization};

use crate::gate::{CompletionGate, GateDecision, ValidationIssue};

const COMPILE_CHECK: &str = "compile";
const MAX_ISSUES_PER_CHECK: usize = 20;
const MAX_MESSAGE_BYTES: usize = 4_000;

/// Outcome of running one shell check
#[derive(Debug)]
struct CommandRun {
    passed: bool,
    output: String,
}

/// Gate that shells out to compile, lint, test and security commands
#[derive(Debug, Clone)]
pub struct CommandGate {
    config: GateConfig,
}

impl CommandGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Gate for a repository, filling unset commands from the detected language
    pub fn for_repo(config: &ArborConfig, repo_root: &Path) -> Self {
        Self::new(config.effective_gate(repo_root))
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    async fn run(&self, working_directory: &Path, command: &str) -> CommandRun {
        let timeout = Duration::from_secs(self.config.timeout_secs.max(1));
        let child = Command::new("sh")
            .args(["-c", command])
            .current_dir(working_directory)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                CommandRun {
                    passed: output.status.success(),
                    output: format!("{}\n{}", stdout.trim(), stderr.trim()).trim().to_string(),
                }
            }
            // Command not found or could not start
            Ok(Err(e)) => CommandRun {
                passed: false,
                output: format!("Failed to run `{}`: {}", command, e),
            },
            Err(_) => CommandRun {
                passed: false,
                output: format!("`{}` timed out after {}s", command, timeout.as_secs()),
            },
        }
    }

    async fn run_check(&self, working_directory: &Path, check: &CheckSpec) -> Vec<ValidationIssue> {
        debug!(check = %check.name, command = %check.command, "Running gate check");
        let run = self.run(working_directory, &check.command).await;
        if run.passed {
            return Vec::new();
        }
        warn!(check = %check.name, severity = %check.severity, "Gate check failed");
        issues_from_output(&check.name, check.severity, &check.command, &run.output)
    }
}

#[async_trait]
impl CompletionGate for CommandGate {
    #[instrument(skip(self), fields(dir = %working_directory.display()))]
    async fn can_complete(
        &self,
        working_directory: &Path,
        specialization: Option<Specialization>,
    ) -> GateDecision {
        if let Some(compile) = &self.config.compile {
            let check = CheckSpec::new(COMPILE_CHECK, compile.clone(), Severity::Critical);
            let issues = self.run_check(working_directory, &check).await;
            if !issues.is_empty() {
                info!(blockers = issues.len(), "Compilation failed, skipping remaining checks");
                return GateDecision {
                    allowed: false,
                    blockers: issues,
                    warnings: Vec::new(),
                };
            }
        }

        let mut issues = Vec::new();
        for check in &self.config.checks {
            if !check.applies_to(specialization) {
                debug!(check = %check.name, ?specialization, "Check not applicable, skipped");
                continue;
            }
            issues.extend(self.run_check(working_directory, check).await);
        }

        let decision = GateDecision::from_issues(issues);
        info!(
            allowed = decision.allowed,
            blockers = decision.blockers.len(),
            warnings = decision.warnings.len(),
            "Completion gate evaluated"
        );
        decision
    }
}

fn rust_location() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // error[E0308]: mismatched types
    //   --> src/main.rs:4:18
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:error|warning)(?:\[\w+\])?: (?P<msg>.+)\n\s*--> (?P<file>[^:\s]+):(?P<line>\d+):\d+")
            .unwrap_or_else(|e| panic!("invalid rust location pattern: {}", e))
    })
}

fn generic_location() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // src/app.py:12:5: E501 line too long
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?P<file>[\w./-]+\.\w+):(?P<line>\d+):(?:\d+:)?\s*(?P<msg>.+)$")
            .unwrap_or_else(|e| panic!("invalid location pattern: {}", e))
    })
}

/// Turn a failed check's output into issues with file and line where found
fn issues_from_output(check: &str, severity: Severity, command: &str, output: &str) -> Vec<ValidationIssue> {
    let mut issues: Vec<ValidationIssue> = rust_location()
        .captures_iter(output)
        .map(|caps| {
            ValidationIssue::new(check, severity, caps["msg"].trim())
                .at(&caps["file"], caps["line"].parse().ok())
        })
        .collect();

    if issues.is_empty() {
        issues = generic_location()
            .captures_iter(output)
            .map(|caps| {
                ValidationIssue::new(check, severity, caps["msg"].trim())
                    .at(&caps["file"], caps["line"].parse().ok())
            })
            .collect();
    }

    if issues.is_empty() {
        let mut message = format!("`{}` failed", command);
        if !output.is_empty() {
            message.push_str(":\n");
            message.push_str(&truncate(output, MAX_MESSAGE_BYTES));
        }
        issues.push(ValidationIssue::new(check, severity, message));
    }

    issues.truncate(MAX_ISSUES_PER_CHECK);
    issues
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &s[..end])
}
