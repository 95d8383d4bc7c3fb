//! Completion gate contract and decision types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use arbor_core::{Severity, Specialization};

/// One problem found by a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Name of the check that found it (`compile`, `tests`, ...)
    pub check: String,
    pub severity: Severity,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl ValidationIssue {
    pub fn new(check: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            severity,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.check)?;
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, " {}:{}", file, line)?,
            (Some(file), None) => write!(f, " {}", file)?,
            _ => {}
        }
        write!(f, ": {}", self.message)
    }
}

/// Verdict of a completion check
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub blockers: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl GateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            ..Default::default()
        }
    }

    /// Partition issues: blocking severities refuse completion, the rest warn
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let (blockers, warnings): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|issue| issue.severity.blocks_completion());
        Self {
            allowed: blockers.is_empty(),
            blockers,
            warnings,
        }
    }

    /// Multi-line listing of blockers then warnings
    pub fn describe(&self) -> String {
        let mut out = String::new();
        if !self.blockers.is_empty() {
            out.push_str(&format!("{} blocker(s):\n", self.blockers.len()));
            for issue in &self.blockers {
                out.push_str(&format!("- {}\n", issue));
            }
        }
        if !self.warnings.is_empty() {
            out.push_str(&format!("{} warning(s):\n", self.warnings.len()));
            for issue in &self.warnings {
                out.push_str(&format!("- {}\n", issue));
            }
        }
        out
    }
}

/// Oracle consulted before a node may enter COMPLETE
///
/// A gate never fails the node: problems running a check are reported as
/// issues, and the engine keeps looping while blockers remain.
#[async_trait]
pub trait CompletionGate: Send + Sync {
    async fn can_complete(
        &self,
        working_directory: &Path,
        specialization: Option<Specialization>,
    ) -> GateDecision;
}

/// Gate with a fixed answer, for dry runs and `--no-gate`
#[derive(Debug, Clone)]
pub struct StaticGate {
    decision: GateDecision,
}

impl StaticGate {
    pub fn allow() -> Self {
        Self {
            decision: GateDecision::allow(),
        }
    }

    pub fn with_decision(decision: GateDecision) -> Self {
        Self { decision }
    }
}

#[async_trait]
impl CompletionGate for StaticGate {
    async fn can_complete(&self, _working_directory: &Path, _specialization: Option<Specialization>) -> GateDecision {
        self.decision.clone()
    }
}
