//! Core type definitions for Arbor orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::money::Usd;

/// Globally unique agent node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex characters, for branch names and log lines
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| format!("Invalid agent id {}: {}", s, e))
    }
}

/// Coarse-grained stage of an agent's work
///
/// Phases only move forward. Skipping ahead is allowed, going back is not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    #[default]
    Explore,
    Plan,
    Found,
    Summon,
    Complete,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Explore,
        Phase::Plan,
        Phase::Found,
        Phase::Summon,
        Phase::Complete,
    ];

    /// Position in the forward order
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Explore => 0,
            Self::Plan => 1,
            Self::Found => 2,
            Self::Summon => 3,
            Self::Complete => 4,
        }
    }

    pub fn next(&self) -> Option<Phase> {
        Self::ALL.get(self.ordinal() as usize + 1).copied()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// One-line guidance shown to the agent for this phase
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::Explore => "Read the codebase and gather the facts the vision depends on.",
            Self::Plan => "Turn what you learned into a concrete, ordered implementation plan.",
            Self::Found => "Lay the foundations: write the core code the plan calls for.",
            Self::Summon => "Delegate well-scoped remaining work to specialized child agents.",
            Self::Complete => "The work is done and validated.",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explore => write!(f, "EXPLORE"),
            Self::Plan => write!(f, "PLAN"),
            Self::Found => write!(f, "FOUND"),
            Self::Summon => write!(f, "SUMMON"),
            Self::Complete => write!(f, "COMPLETE"),
        }
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "explore" => Ok(Self::Explore),
            "plan" => Ok(Self::Plan),
            "found" | "foundation" => Ok(Self::Found),
            "summon" => Ok(Self::Summon),
            "complete" | "done" => Ok(Self::Complete),
            _ => Err(format!(
                "Invalid phase: {}. Use explore, plan, found, summon, or complete.",
                s
            )),
        }
    }
}

/// Lifecycle status of an agent node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AgentStatus {
    /// Terminal statuses never reopen
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "running" | "active" => Ok(Self::Running),
            "completed" | "complete" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// What kind of work an agent is tuned for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specialization {
    #[default]
    General,
    Frontend,
    Backend,
    Database,
    Testing,
    Security,
    Devops,
}

impl Specialization {
    pub const ALL: [Specialization; 7] = [
        Specialization::General,
        Specialization::Frontend,
        Specialization::Backend,
        Specialization::Database,
        Specialization::Testing,
        Specialization::Security,
        Specialization::Devops,
    ];

    pub fn focus(&self) -> &'static str {
        match self {
            Self::General => "general software engineering",
            Self::Frontend => "user interfaces, components, styling and client-side state",
            Self::Backend => "services, APIs, business logic and server-side code",
            Self::Database => "schemas, migrations, queries and data integrity",
            Self::Testing => "unit, integration and end-to-end tests",
            Self::Security => "vulnerabilities, input validation, secrets and auth",
            Self::Devops => "build pipelines, deployment, containers and infrastructure",
        }
    }
}

impl std::fmt::Display for Specialization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Frontend => write!(f, "frontend"),
            Self::Backend => write!(f, "backend"),
            Self::Database => write!(f, "database"),
            Self::Testing => write!(f, "testing"),
            Self::Security => write!(f, "security"),
            Self::Devops => write!(f, "devops"),
        }
    }
}

impl std::str::FromStr for Specialization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "general" => Ok(Self::General),
            "frontend" => Ok(Self::Frontend),
            "backend" => Ok(Self::Backend),
            "database" | "db" => Ok(Self::Database),
            "testing" | "test" => Ok(Self::Testing),
            "security" => Ok(Self::Security),
            "devops" | "ops" => Ok(Self::Devops),
            _ => Err(format!("Invalid specialization: {}", s)),
        }
    }
}

/// Issue severity reported by validation checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl Severity {
    /// Only critical issues block completion
    pub fn blocks_completion(&self) -> bool {
        matches!(self, Self::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" | "0" => Ok(Self::Critical),
            "high" | "1" => Ok(Self::High),
            "medium" | "2" => Ok(Self::Medium),
            "low" | "3" => Ok(Self::Low),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// Structured outcome of a node's work
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
    pub files_deleted: Vec<String>,
    pub summary: String,
    pub next_steps: Vec<String>,
    pub error: Option<String>,
}

impl NodeOutcome {
    /// Every file this node touched, deduplicated, in first-touch order
    pub fn files_touched(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for file in self
            .files_created
            .iter()
            .chain(&self.files_modified)
            .chain(&self.files_deleted)
        {
            if !seen.contains(file) {
                seen.push(file.clone());
            }
        }
        seen
    }

    /// Fold a child's file lists into this outcome
    pub fn absorb_files(&mut self, other: &NodeOutcome) {
        merge_unique(&mut self.files_created, &other.files_created);
        merge_unique(&mut self.files_modified, &other.files_modified);
        merge_unique(&mut self.files_deleted, &other.files_deleted);
    }
}

pub(crate) fn merge_unique(into: &mut Vec<String>, from: &[String]) {
    for item in from {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

/// Why a node stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    /// COMPLETE was requested and the completion gate accepted it
    Completed,
    /// The reasoning engine answered without requesting any tools
    FinalAnswer,
    /// Reached the iteration cap
    MaxIterations,
    /// The budget governor refused the next reasoning call
    BudgetExceeded(String),
    /// The reasoning engine broke the call/response contract
    ProtocolError(String),
    /// Cancelled from outside
    Cancelled,
    /// Unrecoverable error
    Error(String),
}

impl StopReason {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::FinalAnswer)
    }

    /// Terminal status a node takes when it stops for this reason
    pub fn terminal_status(&self) -> AgentStatus {
        match self {
            Self::Completed | Self::FinalAnswer => AgentStatus::Completed,
            Self::Cancelled => AgentStatus::Cancelled,
            _ => AgentStatus::Failed,
        }
    }

    /// Plain-language explanation for users
    pub fn describe(&self) -> String {
        match self {
            Self::Completed => "completed and passed validation".to_string(),
            Self::FinalAnswer => "finished with a final answer".to_string(),
            Self::MaxIterations => "ran out of iterations before finishing".to_string(),
            Self::BudgetExceeded(reason) => format!("BudgetExceeded: {}", reason),
            Self::ProtocolError(reason) => format!("protocol error from the reasoning engine: {}", reason),
            Self::Cancelled => "was cancelled".to_string(),
            Self::Error(reason) => format!("stopped on an error: {}", reason),
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
            Self::FinalAnswer => write!(f, "FinalAnswer"),
            Self::MaxIterations => write!(f, "MaxIterations"),
            Self::BudgetExceeded(_) => write!(f, "BudgetExceeded"),
            Self::ProtocolError(_) => write!(f, "ProtocolError"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Error(_) => write!(f, "Error"),
        }
    }
}

/// One running or finished agent in the tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNode {
    pub id: AgentId,
    /// None only for the root
    pub parent_id: Option<AgentId>,
    pub depth: u32,
    pub vision: String,
    pub working_directory: PathBuf,
    pub specialization: Specialization,
    pub phase: Phase,
    pub status: AgentStatus,
    /// Isolated workspace identifier exclusive to this node
    pub branch: String,
    pub iteration_count: u32,
    pub tool_call_count: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Own spend plus every descendant's spend
    pub cost_so_far: Usd,
    pub budget_ceiling: Usd,
    /// Spawn order
    pub children: Vec<AgentId>,
    pub result: Option<NodeOutcome>,
    pub stop_reason: Option<StopReason>,
}

impl AgentNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Running
    }

    /// Wall-clock duration; running nodes are measured up to `now`
    pub fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).num_milliseconds().max(0)
    }

    pub fn remaining_budget(&self) -> Usd {
        self.budget_ceiling.saturating_sub(self.cost_so_far)
    }
}

/// Terminal report for one node's run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub node_id: AgentId,
    pub success: bool,
    pub status: AgentStatus,
    pub phase: Phase,
    pub stop_reason: StopReason,
    pub outcome: NodeOutcome,
    /// Cost including descendants
    pub cost: Usd,
    pub iterations: u32,
    pub tool_calls: u32,
}

impl AgentResult {
    /// Plain-language failure reason, None on success
    pub fn failure_reason(&self) -> Option<String> {
        if self.success {
            None
        } else {
            Some(
                self.outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| self.stop_reason.describe()),
            )
        }
    }

    /// Compact multi-line report used for tool results and CLI output
    pub fn report(&self) -> String {
        let mut out = format!(
            "Agent {} {} ({}), phase {}, {} iterations, {} tool calls, cost {}\n",
            self.node_id.short(),
            if self.success { "succeeded" } else { "failed" },
            self.stop_reason.describe(),
            self.phase,
            self.iterations,
            self.tool_calls,
            self.cost
        );
        if !self.outcome.summary.is_empty() {
            out.push_str(&format!("Summary: {}\n", self.outcome.summary));
        }
        let files = self.outcome.files_touched();
        if !files.is_empty() {
            out.push_str(&format!("Files touched: {}\n", files.join(", ")));
        }
        if !self.outcome.next_steps.is_empty() {
            out.push_str("Next steps:\n");
            for step in &self.outcome.next_steps {
                out.push_str(&format!("- {}\n", step));
            }
        }
        if let Some(reason) = self.failure_reason() {
            out.push_str(&format!("Failure: {}\n", reason));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert!(Phase::Explore < Phase::Plan);
        assert!(Phase::Plan < Phase::Found);
        assert!(Phase::Found < Phase::Summon);
        assert!(Phase::Summon < Phase::Complete);
        assert_eq!(Phase::Summon.next(), Some(Phase::Complete));
        assert_eq!(Phase::Complete.next(), None);
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!("PLAN".parse::<Phase>().unwrap(), Phase::Plan);
        assert_eq!("found".parse::<Phase>().unwrap(), Phase::Found);
        assert!("sideways".parse::<Phase>().is_err());
        assert_eq!(Phase::Summon.to_string(), "SUMMON");
    }

    #[test]
    fn test_phase_serde_uppercase() {
        let json = serde_json::to_string(&Phase::Complete).unwrap();
        assert_eq!(json, "\"COMPLETE\"");
    }

    #[test]
    fn test_status_terminal() {
        assert!(!AgentStatus::Running.is_terminal());
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Failed.is_terminal());
        assert!(AgentStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_specialization_parsing() {
        for spec in Specialization::ALL {
            assert_eq!(spec.to_string().parse::<Specialization>().unwrap(), spec);
        }
        assert!("wizard".parse::<Specialization>().is_err());
    }

    #[test]
    fn test_stop_reason_status() {
        assert_eq!(StopReason::Completed.terminal_status(), AgentStatus::Completed);
        assert_eq!(
            StopReason::BudgetExceeded("x".into()).terminal_status(),
            AgentStatus::Failed
        );
        assert_eq!(StopReason::Cancelled.terminal_status(), AgentStatus::Cancelled);
        assert!(StopReason::BudgetExceeded("x".into())
            .describe()
            .starts_with("BudgetExceeded"));
    }

    #[test]
    fn test_outcome_files_touched_dedup() {
        let mut outcome = NodeOutcome {
            files_created: vec!["a.rs".into()],
            files_modified: vec!["a.rs".into(), "b.rs".into()],
            ..Default::default()
        };
        assert_eq!(outcome.files_touched(), vec!["a.rs", "b.rs"]);

        let child = NodeOutcome {
            files_created: vec!["c.rs".into(), "a.rs".into()],
            ..Default::default()
        };
        outcome.absorb_files(&child);
        assert_eq!(outcome.files_created, vec!["a.rs", "c.rs"]);
    }

    #[test]
    fn test_agent_id_roundtrip_display() {
        let id = AgentId::new();
        let parsed: AgentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.short().len(), 8);
    }
}
