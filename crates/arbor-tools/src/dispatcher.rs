//! Tool dispatcher: name lookup, bounded execution, batch ordering
//!
//! `execute` surfaces errors; `invoke` and `execute_batch` never fail and
//! turn every error, panic or timeout into a `success: false` result that
//! echoes the invocation id.

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use arbor_agent::{ContentBlock, ToolSchema};
use arbor_core::{ArborError, Result};

use crate::fs::{DeleteFileTool, ListFilesTool, ReadFileTool, WriteFileTool};
use crate::git::GitTool;
use crate::phase::ReportPhaseTool;
use crate::shell::RunCommandTool;
use crate::tool::{Tool, ToolContext, ToolOutput};
use crate::tree_tools::{CoordinateAgentsTool, GetAgentStatusTool, SummonAgentTool};

/// One tool call requested by the reasoning engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub invocation_id: String,
    pub tool_name: String,
    pub input: Value,
}

impl ToolInvocation {
    pub fn new(invocation_id: impl Into<String>, tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            tool_name: tool_name.into(),
            input,
        }
    }
}

/// Result of one invocation, always tied back to its id
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub invocation_id: String,
    pub tool_name: String,
    pub success: bool,
    pub output: Option<ToolOutput>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolCallResult {
    fn from_outcome(invocation: &ToolInvocation, outcome: Result<ToolOutput>, started: Instant) -> Self {
        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => Self {
                invocation_id: invocation.invocation_id.clone(),
                tool_name: invocation.tool_name.clone(),
                success: !output.is_error,
                error: output.is_error.then(|| output.content.clone()),
                output: Some(output),
                duration_ms,
            },
            Err(e) => Self {
                invocation_id: invocation.invocation_id.clone(),
                tool_name: invocation.tool_name.clone(),
                success: false,
                output: None,
                error: Some(e.to_string()),
                duration_ms,
            },
        }
    }

    /// An error result the engine builds without running anything
    pub fn rejected(invocation: &ToolInvocation, error: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation.invocation_id.clone(),
            tool_name: invocation.tool_name.clone(),
            success: false,
            output: None,
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    /// A successful result the engine builds without running anything
    pub fn answered(invocation: &ToolInvocation, content: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation.invocation_id.clone(),
            tool_name: invocation.tool_name.clone(),
            success: true,
            output: Some(ToolOutput::text(content)),
            error: None,
            duration_ms: 0,
        }
    }

    /// Text shown to the reasoning engine
    pub fn content(&self) -> String {
        match (&self.output, &self.error) {
            (Some(output), _) => output.content.clone(),
            (None, Some(error)) => format!("Error: {}", error),
            (None, None) => String::new(),
        }
    }

    pub fn to_content_block(&self) -> ContentBlock {
        ContentBlock::tool_result(self.invocation_id.clone(), self.content(), !self.success)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Maps tool names to implementations
#[derive(Default)]
pub struct ToolDispatcher {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, for stable schema listings
    order: Vec<String>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with every built-in tool registered
    pub fn with_builtin_tools() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Arc::new(ReadFileTool));
        dispatcher.register(Arc::new(ListFilesTool));
        dispatcher.register(Arc::new(WriteFileTool));
        dispatcher.register(Arc::new(DeleteFileTool));
        dispatcher.register(Arc::new(RunCommandTool));
        dispatcher.register(Arc::new(GitTool));
        dispatcher.register(Arc::new(ReportPhaseTool));
        dispatcher.register(Arc::new(SummonAgentTool));
        dispatcher.register(Arc::new(CoordinateAgentsTool));
        dispatcher.register(Arc::new(GetAgentStatusTool));
        dispatcher
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Schemas in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.schema())
            .collect()
    }

    /// Schemas for tools usable in this context (tree tools need a tree)
    pub fn schemas_for(&self, ctx: &ToolContext) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .filter(|tool| ctx.tree.is_some() || !tool.tree_aware())
            .map(|tool| tool.schema())
            .collect()
    }

    pub fn is_read_only(&self, name: &str) -> bool {
        self.tools.get(name).map(|t| t.read_only()).unwrap_or(false)
    }

    /// Run one tool by name under the context's timeout
    pub async fn execute(&self, name: &str, input: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ArborError::UnknownTool(name.to_string()))?;

        if tool.tree_aware() && ctx.tree.is_none() {
            return Err(ArborError::ToolConfiguration(format!(
                "{} is tree-aware but was called without an agent tree",
                name
            )));
        }

        let guarded = AssertUnwindSafe(tool.execute(input, ctx)).catch_unwind();

        // Tree tools block on whole child runs, which carry their own limits
        let outcome = if tool.tree_aware() {
            guarded.await
        } else {
            match tokio::time::timeout(ctx.timeout, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(ArborError::ToolTimeout {
                        tool: name.to_string(),
                        secs: ctx.timeout.as_secs(),
                    })
                }
            }
        };

        outcome.unwrap_or_else(|payload| {
            Err(ArborError::ToolExecution {
                tool: name.to_string(),
                message: format!("panicked: {}", panic_message(payload)),
            })
        })
    }

    /// Run one invocation; never fails
    pub async fn invoke(&self, invocation: &ToolInvocation, ctx: &ToolContext) -> ToolCallResult {
        let started = Instant::now();
        debug!(
            tool = %invocation.tool_name,
            id = %invocation.invocation_id,
            session = %ctx.session_id,
            "Dispatching tool"
        );

        let outcome = self.execute(&invocation.tool_name, &invocation.input, ctx).await;
        let result = ToolCallResult::from_outcome(invocation, outcome, started);

        if !result.success {
            warn!(
                tool = %result.tool_name,
                id = %result.invocation_id,
                error = result.error.as_deref().unwrap_or(""),
                "Tool call failed"
            );
        }
        result
    }

    /// Run invocations in order, one result per invocation
    ///
    /// Consecutive read-only tools run concurrently; anything that mutates
    /// runs alone, after everything before it has finished.
    pub async fn execute_batch(
        &self,
        invocations: &[ToolInvocation],
        ctx: &ToolContext,
    ) -> Vec<ToolCallResult> {
        let mut results = Vec::with_capacity(invocations.len());
        let mut index = 0;

        while index < invocations.len() {
            if self.is_read_only(&invocations[index].tool_name) {
                let end = invocations[index..]
                    .iter()
                    .position(|inv| !self.is_read_only(&inv.tool_name))
                    .map(|offset| index + offset)
                    .unwrap_or(invocations.len());

                let group = invocations[index..end].iter().map(|inv| self.invoke(inv, ctx));
                results.extend(join_all(group).await);
                index = end;
            } else {
                results.push(self.invoke(&invocations[index], ctx).await);
                index += 1;
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::AgentId;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records start and end order to observe overlap
    struct Timed {
        name: &'static str,
        read_only: bool,
        delay_ms: u64,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Tool for Timed {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "records its timing"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn read_only(&self) -> bool {
            self.read_only
        }
        async fn execute(&self, input: &Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            let tag = input["tag"].as_str().unwrap_or("?").to_string();
            self.log.lock().unwrap().push(format!("start {}", tag));
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.log.lock().unwrap().push(format!("end {}", tag));
            Ok(ToolOutput::text(tag))
        }
    }

    struct Panics;

    #[async_trait]
    impl Tool for Panics {
        fn name(&self) -> &str {
            "panics"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _input: &Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            panic!("boom")
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(AgentId::new(), ".")
    }

    fn timed_tools(log: &Arc<Mutex<Vec<String>>>) -> ToolDispatcher {
        let mut d = ToolDispatcher::new();
        d.register(Arc::new(Timed {
            name: "look",
            read_only: true,
            delay_ms: 30,
            log: log.clone(),
        }));
        d.register(Arc::new(Timed {
            name: "change",
            read_only: false,
            delay_ms: 5,
            log: log.clone(),
        }));
        d
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let d = ToolDispatcher::with_builtin_tools();
        let err = d.execute("teleport", &json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, ArborError::UnknownTool(_)));

        let result = d
            .invoke(&ToolInvocation::new("t1", "teleport", json!({})), &ctx())
            .await;
        assert!(!result.success);
        assert_eq!(result.invocation_id, "t1");
        assert!(matches!(
            result.to_content_block(),
            ContentBlock::ToolResult { is_error: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_tree_tool_without_tree_is_configuration_error() {
        let d = ToolDispatcher::with_builtin_tools();
        let err = d
            .execute("summon_agent", &json!({"vision": "x"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ArborError::ToolConfiguration(_)));
        assert!(d
            .schemas_for(&ctx())
            .iter()
            .all(|s| s.name != "summon_agent" && s.name != "get_agent_status"));
        assert_eq!(d.schemas().len(), 10);
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let mut d = ToolDispatcher::new();
        d.register(Arc::new(Panics));
        let result = d
            .invoke(&ToolInvocation::new("p1", "panics", json!({})), &ctx())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed_result() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = timed_tools(&log);
        let ctx = ctx().with_timeout(Duration::from_millis(5));
        let result = d
            .invoke(&ToolInvocation::new("slow", "look", json!({"tag": "a"})), &ctx)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_serializes_mutations() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = timed_tools(&log);
        let batch = vec![
            ToolInvocation::new("1", "look", json!({"tag": "r1"})),
            ToolInvocation::new("2", "look", json!({"tag": "r2"})),
            ToolInvocation::new("3", "change", json!({"tag": "w1"})),
            ToolInvocation::new("4", "look", json!({"tag": "r3"})),
        ];

        let results = d.execute_batch(&batch, &ctx()).await;
        let ids: Vec<&str> = results.iter().map(|r| r.invocation_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert!(results.iter().all(|r| r.success));

        let log = log.lock().unwrap();
        // The two leading reads overlap
        assert_eq!(&log[..2], &["start r1", "start r2"]);
        // The write starts only after both reads end and ends before the last read starts
        let pos = |s: &str| log.iter().position(|l| l == s).unwrap();
        assert!(pos("start w1") > pos("end r1"));
        assert!(pos("start w1") > pos("end r2"));
        assert!(pos("end w1") < pos("start r3"));
    }

    #[test]
    fn test_flagged_output_is_unsuccessful() {
        let inv = ToolInvocation::new("x", "run_command", json!({}));
        let result =
            ToolCallResult::from_outcome(&inv, Ok(ToolOutput::failure("exit: 1")), Instant::now());
        assert!(!result.success);
        assert_eq!(result.content(), "exit: 1");
        assert_eq!(result.error.as_deref(), Some("exit: 1"));
    }
}
