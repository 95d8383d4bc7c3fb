//! Tree-aware tools: summoning children and inspecting the tree
//!
//! These run through the [`AgentTree`](arbor_core::AgentTree) handle in the
//! tool context. A child that fails, or a spawn the tree refuses, comes back
//! as an error-flagged result rather than an error, so the parent can react.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use arbor_core::{
    AgentId, AgentResult, AgentStatus, ArborError, NodeOutcome, Phase, Result, SortKey,
    Specialization, SpawnRequest, StatusFilter, StatusQuery, Usd,
};

use crate::tool::{parse_input, Tool, ToolContext, ToolOutput};

pub const SUMMON_AGENT: &str = "summon_agent";
pub const COORDINATE_AGENTS: &str = "coordinate_agents";
pub const GET_AGENT_STATUS: &str = "get_agent_status";

#[derive(Debug, Clone, Deserialize)]
struct AgentSpec {
    #[serde(default)]
    specialization: Option<String>,
    vision: String,
    /// Dollars, as a number or a decimal string
    #[serde(default)]
    budget_usd: Option<Value>,
    #[serde(default)]
    start_phase: Option<String>,
    #[serde(default)]
    max_iterations: Option<u32>,
}

impl AgentSpec {
    fn into_request(self, tool: &str) -> Result<SpawnRequest> {
        let invalid = |msg: String| ArborError::InvalidInput(format!("{}: {}", tool, msg));

        if self.vision.trim().is_empty() {
            return Err(invalid("vision cannot be empty".to_string()));
        }
        let specialization = match self.specialization.as_deref() {
            Some(s) => s.parse::<Specialization>().map_err(invalid)?,
            None => Specialization::General,
        };
        let mut request = SpawnRequest::new(specialization, self.vision);

        if let Some(budget) = self.budget_usd {
            request = request.with_budget(parse_budget(&budget).map_err(invalid)?);
        }
        if let Some(phase) = self.start_phase.as_deref() {
            request = request.with_start_phase(phase.parse::<Phase>().map_err(invalid)?);
        }
        if let Some(max) = self.max_iterations {
            request = request.with_max_iterations(max);
        }
        Ok(request)
    }
}

fn parse_budget(value: &Value) -> std::result::Result<Usd, String> {
    let budget = match value {
        Value::Number(n) => n
            .as_f64()
            .map(Usd::from_dollars_f64)
            .ok_or_else(|| format!("invalid budget {}", n))?,
        Value::String(s) => s.parse::<Usd>()?,
        other => return Err(format!("budget_usd must be a number or string, got {}", other)),
    };
    if budget <= Usd::ZERO {
        return Err("budget_usd must be positive".to_string());
    }
    Ok(budget)
}

fn outcome_output(content: String, outcome: &NodeOutcome, success: bool) -> ToolOutput {
    let mut output = if success {
        ToolOutput::text(content)
    } else {
        ToolOutput::failure(content)
    };
    output.files_created = outcome.files_created.clone();
    output.files_modified = outcome.files_modified.clone();
    output.files_deleted = outcome.files_deleted.clone();
    output
}

fn result_data(result: &AgentResult) -> Value {
    serde_json::to_value(result).unwrap_or(Value::Null)
}

pub struct SummonAgentTool;

#[async_trait]
impl Tool for SummonAgentTool {
    fn name(&self) -> &str {
        SUMMON_AGENT
    }

    fn description(&self) -> &str {
        "Summon a specialized child agent for a sub-problem and wait for it to finish. \
         Only one child runs at a time. The child's budget is carved out of yours."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "specialization": {
                    "type": "string",
                    "enum": ["general", "frontend", "backend", "database", "testing", "security", "devops"]
                },
                "vision": {"type": "string", "description": "Goal for the child agent"},
                "budget_usd": {"type": ["number", "string"], "description": "Budget to carve out for the child"},
                "start_phase": {"type": "string", "enum": ["EXPLORE", "PLAN", "FOUND", "SUMMON"]},
                "max_iterations": {"type": "integer"}
            },
            "required": ["vision"]
        })
    }

    fn tree_aware(&self) -> bool {
        true
    }

    async fn execute(&self, input: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let tree = ctx.require_tree(self.name())?;
        let spec: AgentSpec = parse_input(self.name(), input)?;
        let request = spec.into_request(self.name())?;

        info!(
            parent = %ctx.session_id,
            specialization = %request.specialization,
            "Summoning child agent"
        );

        match tree.summon(&ctx.session_id, request).await {
            Ok(result) => {
                let output = outcome_output(result.report(), &result.outcome, result.success);
                Ok(output.with_data(result_data(&result)))
            }
            Err(e @ (ArborError::DepthExceeded { .. }
            | ArborError::SequentialConstraintViolation { .. }
            | ArborError::BudgetExceeded(_))) => {
                warn!(parent = %ctx.session_id, error = %e, "Spawn rejected");
                Ok(ToolOutput::failure(format!("Spawn rejected: {}", e)))
            }
            Err(e) => Err(e),
        }
    }
}

pub struct CoordinateAgentsTool;

#[derive(Deserialize)]
struct CoordinateArgs {
    agents: Vec<AgentSpec>,
    #[serde(default = "default_stop_on_failure")]
    stop_on_failure: bool,
}

fn default_stop_on_failure() -> bool {
    true
}

#[async_trait]
impl Tool for CoordinateAgentsTool {
    fn name(&self) -> &str {
        COORDINATE_AGENTS
    }

    fn description(&self) -> &str {
        "Run several child agents one after another, each to completion. \
         Stops at the first failure unless stop_on_failure is false."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agents": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "specialization": {"type": "string"},
                            "vision": {"type": "string"},
                            "budget_usd": {"type": ["number", "string"]},
                            "start_phase": {"type": "string"},
                            "max_iterations": {"type": "integer"}
                        },
                        "required": ["vision"]
                    }
                },
                "stop_on_failure": {"type": "boolean"}
            },
            "required": ["agents"]
        })
    }

    fn tree_aware(&self) -> bool {
        true
    }

    async fn execute(&self, input: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let tree = ctx.require_tree(self.name())?;
        let args: CoordinateArgs = parse_input(self.name(), input)?;
        if args.agents.is_empty() {
            return Err(ArborError::InvalidInput(format!("{}: agents cannot be empty", self.name())));
        }

        // Validate everything before running anything
        let requests = args
            .agents
            .into_iter()
            .map(|spec| spec.into_request(self.name()))
            .collect::<Result<Vec<_>>>()?;
        let total = requests.len();

        let mut combined = NodeOutcome::default();
        let mut sections = Vec::new();
        let mut results = Vec::new();
        let mut failures = 0;

        for (index, request) in requests.into_iter().enumerate() {
            let label = format!("[{}/{}] {}", index + 1, total, request.specialization);
            let succeeded = match tree.summon(&ctx.session_id, request).await {
                Ok(result) => {
                    combined.absorb_files(&result.outcome);
                    sections.push(format!("{}\n{}", label, result.report()));
                    let success = result.success;
                    results.push(result_data(&result));
                    success
                }
                Err(e) => {
                    sections.push(format!("{}\nSpawn rejected: {}", label, e));
                    false
                }
            };

            if !succeeded {
                failures += 1;
                if args.stop_on_failure {
                    if index + 1 < total {
                        sections.push(format!("Stopped; {} agent(s) not run.", total - index - 1));
                    }
                    break;
                }
            }
        }

        let content = sections.join("\n");
        let output = outcome_output(content, &combined, failures == 0);
        Ok(output.with_data(json!({ "results": results, "failures": failures })))
    }
}

pub struct GetAgentStatusTool;

#[derive(Deserialize, Default)]
struct StatusArgs {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    specialization: Option<String>,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    min_depth: Option<u32>,
    #[serde(default)]
    max_depth: Option<u32>,
    #[serde(default)]
    sort_by: Option<String>,
    #[serde(default)]
    include_tree: bool,
}

impl StatusArgs {
    fn query(&self, tool: &str) -> Result<StatusQuery> {
        let invalid = |msg: String| ArborError::InvalidInput(format!("{}: {}", tool, msg));
        let filter = StatusFilter {
            status: self
                .status
                .as_deref()
                .map(str::parse::<AgentStatus>)
                .transpose()
                .map_err(invalid)?,
            specialization: self
                .specialization
                .as_deref()
                .map(str::parse::<Specialization>)
                .transpose()
                .map_err(invalid)?,
            phase: self
                .phase
                .as_deref()
                .map(str::parse::<Phase>)
                .transpose()
                .map_err(invalid)?,
            min_depth: self.min_depth,
            max_depth: self.max_depth,
        };
        let sort = self
            .sort_by
            .as_deref()
            .map(str::parse::<SortKey>)
            .transpose()
            .map_err(invalid)?
            .unwrap_or_default();
        Ok(StatusQuery { filter, sort })
    }
}

#[async_trait]
impl Tool for GetAgentStatusTool {
    fn name(&self) -> &str {
        GET_AGENT_STATUS
    }

    fn description(&self) -> &str {
        "Inspect the agent tree: one agent by id, or all agents filtered by status, specialization, \
         phase or depth and sorted by start_time, depth, specialization, status or duration."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_id": {"type": "string"},
                "status": {"type": "string", "enum": ["running", "completed", "failed", "cancelled"]},
                "specialization": {"type": "string"},
                "phase": {"type": "string"},
                "min_depth": {"type": "integer"},
                "max_depth": {"type": "integer"},
                "sort_by": {"type": "string", "enum": ["tree", "start_time", "depth", "specialization", "status", "duration"]},
                "include_tree": {"type": "boolean", "description": "Append an indented tree rendering"}
            }
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    fn tree_aware(&self) -> bool {
        true
    }

    async fn execute(&self, input: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let tree = ctx.require_tree(self.name())?;
        let args: StatusArgs = if input.is_null() {
            StatusArgs::default()
        } else {
            parse_input(self.name(), input)?
        };

        if let Some(raw) = args.agent_id.as_deref() {
            let id = raw
                .parse::<AgentId>()
                .map_err(|e| ArborError::InvalidInput(format!("{}: {}", self.name(), e)))?;
            let node = tree
                .node(&id)
                .await
                .ok_or_else(|| ArborError::NodeNotFound(id.to_string()))?;
            let data = serde_json::to_value(&node)?;
            return Ok(ToolOutput::text(serde_json::to_string_pretty(&data)?).with_data(data));
        }

        let query = args.query(self.name())?;
        let status = tree.status(&query).await;

        let mut content = format!(
            "{} agents: {} running, {} completed, {} failed, {} cancelled; max depth {}; total cost {}\n",
            status.total_nodes,
            status.active_nodes,
            status.completed_nodes,
            status.failed_nodes,
            status.cancelled_nodes,
            status.max_depth,
            status.total_cost
        );
        for node in &status.tree {
            content.push_str(&format!(
                "- {} depth={} {} {} {} cost={}\n",
                node.id.short(),
                node.depth,
                node.specialization,
                node.phase,
                node.status,
                node.cost_so_far
            ));
        }
        if args.include_tree {
            content.push('\n');
            content.push_str(&tree.visualize().await);
        }

        Ok(ToolOutput::text(content).with_data(serde_json::to_value(&status)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{AgentNode, AgentTree, StopReason, TreeStatus};
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    /// Tree double that records requests and answers from a script
    #[derive(Default)]
    struct ScriptedTree {
        requests: Mutex<Vec<SpawnRequest>>,
        /// true = child succeeds, false = child fails; exhausted = depth error
        outcomes: Mutex<Vec<bool>>,
    }

    fn node(id: AgentId, depth: u32) -> AgentNode {
        AgentNode {
            id,
            parent_id: None,
            depth,
            vision: "root".into(),
            working_directory: PathBuf::from("."),
            specialization: Specialization::General,
            phase: Phase::Explore,
            status: AgentStatus::Running,
            branch: "arbor/abc".into(),
            iteration_count: 0,
            tool_call_count: 0,
            start_time: Utc::now(),
            end_time: None,
            cost_so_far: Usd::ZERO,
            budget_ceiling: Usd::from_dollars(1),
            children: Vec::new(),
            result: None,
            stop_reason: None,
        }
    }

    #[async_trait]
    impl AgentTree for ScriptedTree {
        async fn summon(&self, parent: &AgentId, request: SpawnRequest) -> Result<AgentResult> {
            self.requests.lock().unwrap().push(request);
            let next = {
                let mut outcomes = self.outcomes.lock().unwrap();
                if outcomes.is_empty() {
                    None
                } else {
                    Some(outcomes.remove(0))
                }
            };
            let Some(success) = next else {
                return Err(ArborError::DepthExceeded {
                    parent: parent.to_string(),
                    requested: 2,
                    max: 1,
                });
            };
            let stop_reason = if success {
                StopReason::Completed
            } else {
                StopReason::MaxIterations
            };
            Ok(AgentResult {
                node_id: AgentId::new(),
                success,
                status: stop_reason.terminal_status(),
                phase: Phase::Complete,
                stop_reason,
                outcome: NodeOutcome {
                    files_created: vec![format!("file_{}.rs", success)],
                    ..Default::default()
                },
                cost: Usd::from_cents(10),
                iterations: 2,
                tool_calls: 1,
            })
        }

        async fn status(&self, query: &StatusQuery) -> TreeStatus {
            let nodes = vec![node(AgentId::new(), 0)];
            TreeStatus::from_nodes(nodes.into_iter().filter(|n| query.filter.matches(n)).collect())
        }

        async fn node(&self, id: &AgentId) -> Option<AgentNode> {
            Some(node(*id, 0))
        }

        async fn visualize(&self) -> String {
            "[root] EXPLORE running".to_string()
        }
    }

    fn ctx(tree: Arc<ScriptedTree>) -> ToolContext {
        ToolContext::new(AgentId::new(), ".").with_tree(tree)
    }

    #[tokio::test]
    async fn test_summon_success_propagates_files() {
        let tree = Arc::new(ScriptedTree::default());
        tree.outcomes.lock().unwrap().push(true);

        let out = SummonAgentTool
            .execute(
                &json!({"specialization": "testing", "vision": "add tests", "budget_usd": "0.25"}),
                &ctx(tree.clone()),
            )
            .await
            .unwrap();

        assert!(!out.is_error);
        assert_eq!(out.files_created, vec!["file_true.rs"]);
        let requests = tree.requests.lock().unwrap();
        assert_eq!(requests[0].specialization, Specialization::Testing);
        assert_eq!(requests[0].budget, Some(Usd::from_cents(25)));
    }

    #[tokio::test]
    async fn test_summon_failure_and_rejection_are_flagged_results() {
        let tree = Arc::new(ScriptedTree::default());
        tree.outcomes.lock().unwrap().push(false);
        let ctx = ctx(tree);

        let failed = SummonAgentTool
            .execute(&json!({"vision": "x"}), &ctx)
            .await
            .unwrap();
        assert!(failed.is_error);
        assert_eq!(failed.files_created, vec!["file_false.rs"]);

        let rejected = SummonAgentTool
            .execute(&json!({"vision": "y"}), &ctx)
            .await
            .unwrap();
        assert!(rejected.is_error);
        assert!(rejected.content.contains("Depth exceeded"));
    }

    #[tokio::test]
    async fn test_summon_validates_input() {
        let tree = Arc::new(ScriptedTree::default());
        let err = SummonAgentTool
            .execute(&json!({"vision": "x", "specialization": "chef"}), &ctx(tree.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ArborError::InvalidInput(_)));
        let err = SummonAgentTool
            .execute(&json!({"vision": "x", "budget_usd": -1}), &ctx(tree.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ArborError::InvalidInput(_)));
        assert!(tree.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_coordinate_stops_on_failure() {
        let tree = Arc::new(ScriptedTree::default());
        tree.outcomes.lock().unwrap().extend([true, false, true]);

        let out = CoordinateAgentsTool
            .execute(
                &json!({"agents": [{"vision": "a"}, {"vision": "b"}, {"vision": "c"}]}),
                &ctx(tree.clone()),
            )
            .await
            .unwrap();

        assert!(out.is_error);
        assert_eq!(tree.requests.lock().unwrap().len(), 2);
        assert!(out.content.contains("1 agent(s) not run"));
        assert_eq!(out.files_created, vec!["file_true.rs", "file_false.rs"]);
    }

    #[tokio::test]
    async fn test_coordinate_continues_when_asked() {
        let tree = Arc::new(ScriptedTree::default());
        tree.outcomes.lock().unwrap().extend([false, true]);

        let out = CoordinateAgentsTool
            .execute(
                &json!({"agents": [{"vision": "a"}, {"vision": "b"}], "stop_on_failure": false}),
                &ctx(tree.clone()),
            )
            .await
            .unwrap();

        assert!(out.is_error);
        assert_eq!(tree.requests.lock().unwrap().len(), 2);
        assert_eq!(out.data.unwrap()["failures"], 1);
    }

    #[tokio::test]
    async fn test_status_query_and_tree() {
        let tree = Arc::new(ScriptedTree::default());
        let out = GetAgentStatusTool
            .execute(
                &json!({"status": "running", "sort_by": "depth", "include_tree": true}),
                &ctx(tree.clone()),
            )
            .await
            .unwrap();
        assert!(out.content.starts_with("1 agents: 1 running"));
        assert!(out.content.contains("[root] EXPLORE running"));

        let out = GetAgentStatusTool
            .execute(&json!({"status": "failed"}), &ctx(tree))
            .await
            .unwrap();
        assert!(out.content.starts_with("0 agents"));
    }

    #[tokio::test]
    async fn test_status_rejects_bad_sort() {
        let tree = Arc::new(ScriptedTree::default());
        let err = GetAgentStatusTool
            .execute(&json!({"sort_by": "vibes"}), &ctx(tree))
            .await
            .unwrap_err();
        assert!(matches!(err, ArborError::InvalidInput(_)));
    }
}
