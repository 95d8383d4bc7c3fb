//! Phase engine - drives one node from its first reasoning call to a terminal status
//!
//! Each iteration:
//! 1. Rebuild the system prompt from the node's phase, iteration and budget
//! 2. Ask the budget governor to authorize the call
//! 3. Call the reasoning engine and record its cost
//! 4. Execute requested tools; `report_phase` is handled here, never dispatched
//! 5. Feed results back as the next user message
//!
//! The conversation is kept for the life of the node. A response with no tool
//! calls ends the run with that answer; an accepted COMPLETE ends it as
//! completed.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use arbor_agent::{Message, Model, ReasoningRequest, ReasoningResponse, ToolSchema};
use arbor_core::config::ArborConfig;
use arbor_core::{
    AgentId, AgentResult, AgentTree, ArborError, NodeOutcome, Phase, Result, StopReason,
};
use arbor_tools::{
    PhaseReport, ToolCallResult, ToolContext, ToolInvocation, ToolOutput, REPORT_PHASE,
};
use arbor_validation::GateDecision;

use crate::activity_logger::{SessionEvent, ToolActivity};
use crate::budget::Authorization;
use crate::phases::{rejection_message, validate_transition, Transition};
use crate::prompt::{
    build_system_prompt, format_gate_accepted, format_gate_blockers, initial_message, PromptContext,
};
use crate::tree::AgentTreeManager;

/// Per-node loop parameters shared by every engine in a tree
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub model: Model,
    /// Default iteration cap; a spawn request may override it for one child
    pub max_iterations: u32,
    pub max_tokens: u32,
    pub thinking_budget: Option<u32>,
    pub reasoning_timeout: Duration,
    pub tool_timeout: Duration,
    /// Tools report what they would do instead of doing it
    pub dry_run: bool,
    pub protected_files: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_parts(&ArborConfig::default(), Model::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &ArborConfig) -> Result<Self> {
        let model: Model = config
            .models
            .default
            .parse()
            .map_err(ArborError::Config)?;
        Ok(Self::from_parts(config, model))
    }

    fn from_parts(config: &ArborConfig, model: Model) -> Self {
        Self {
            model,
            max_iterations: config.engine.max_iterations,
            max_tokens: config.engine.max_tokens,
            thinking_budget: config.engine.thinking_budget,
            reasoning_timeout: Duration::from_secs(config.engine.reasoning_timeout_secs),
            tool_timeout: Duration::from_secs(config.engine.tool_timeout_secs),
            dry_run: false,
            protected_files: config.protected_files.clone(),
        }
    }
}

/// What the loop has accumulated so far
#[derive(Default)]
struct ExecutionSummary {
    outcome: NodeOutcome,
    last_text: String,
    phase_summaries: Vec<String>,
    last_gate: Option<GateDecision>,
    completed: bool,
}

impl ExecutionSummary {
    fn absorb(&mut self, output: &ToolOutput) {
        self.outcome.absorb_files(&NodeOutcome {
            files_created: output.files_created.clone(),
            files_modified: output.files_modified.clone(),
            files_deleted: output.files_deleted.clone(),
            ..Default::default()
        });
    }

    fn note_report(&mut self, report: &PhaseReport) {
        if let Some(summary) = report.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            self.phase_summaries
                .push(format!("{}: {}", report.phase, summary.trim()));
        }
        if !report.next_steps.is_empty() {
            self.outcome.next_steps = report.next_steps.clone();
        }
    }

    fn into_outcome(self) -> NodeOutcome {
        let mut outcome = self.outcome;
        outcome.summary = if self.phase_summaries.is_empty() {
            self.last_text.trim().to_string()
        } else {
            self.phase_summaries.join("\n")
        };
        if let Some(gate) = self.last_gate.filter(|g| !g.allowed) {
            outcome
                .next_steps
                .extend(gate.blockers.iter().map(|issue| format!("Fix: {}", issue)));
        }
        outcome
    }
}

/// Drives a single node's reasoning loop
pub struct PhaseEngine {
    manager: Arc<AgentTreeManager>,
    node_id: AgentId,
}

impl PhaseEngine {
    pub fn new(manager: Arc<AgentTreeManager>, node_id: AgentId) -> Self {
        Self { manager, node_id }
    }

    /// Run until the node reaches a terminal status
    ///
    /// Loop failures become stop reasons on the result; `Err` means the node
    /// could not be run at all.
    pub async fn run(self) -> Result<AgentResult> {
        let node = self
            .manager
            .get_node(&self.node_id)
            .await
            .ok_or_else(|| ArborError::NodeNotFound(self.node_id.to_string()))?;
        let settings = self.manager.settings();
        let max_iterations = self.manager.iteration_limit(&self.node_id).await;

        let tree: Arc<dyn AgentTree> = self.manager.clone();
        let ctx = ToolContext::new(node.id, node.working_directory.clone())
            .with_parent(node.parent_id)
            .with_specialization(node.specialization)
            .with_branch(node.branch.clone())
            .with_dry_run(settings.dry_run)
            .with_timeout(settings.tool_timeout)
            .with_protected_files(settings.protected_files.clone())
            .with_tree(tree);
        let tools = self.manager.services().tools.schemas_for(&ctx);
        let mut messages = vec![Message::user_text(initial_message(&node))];

        info!(
            node = %node.id,
            depth = node.depth,
            phase = %node.phase,
            max_iterations,
            "Starting agent loop"
        );

        let mut state = ExecutionSummary::default();
        let stop_reason = self
            .drive(&ctx, &tools, &mut messages, &mut state, max_iterations)
            .await;

        self.manager
            .finish_node(&self.node_id, stop_reason, state.into_outcome())
            .await
    }

    async fn drive(
        &self,
        ctx: &ToolContext,
        tools: &[ToolSchema],
        messages: &mut Vec<Message>,
        state: &mut ExecutionSummary,
        max_iterations: u32,
    ) -> StopReason {
        let services = self.manager.services();
        let settings = self.manager.settings();
        let id = self.node_id;

        loop {
            if self.manager.is_cancelled(&id).await {
                return StopReason::Cancelled;
            }

            let Some(node) = self.manager.get_node(&id).await else {
                return StopReason::Error(format!("node {} disappeared", id));
            };
            if node.iteration_count >= max_iterations {
                warn!(node = %id, max_iterations, "Max iterations reached");
                return StopReason::MaxIterations;
            }

            let iteration = node.iteration_count + 1;
            let spent = services.governor.spent(&id).await;
            let remaining = services.governor.remaining(&id).await;
            let system = build_system_prompt(&PromptContext {
                node: &node,
                iteration,
                max_iterations,
                max_depth: self.manager.max_depth(),
                spent,
                remaining,
            });
            let request = ReasoningRequest {
                model: settings.model,
                system,
                messages: messages.clone(),
                tools: tools.to_vec(),
                max_tokens: settings.max_tokens,
                thinking_budget: settings.thinking_budget,
            };

            // Authorize before anything is sent
            let worst_case = settings.model.pricing().worst_case(
                request.estimated_input_tokens(),
                request.max_billable_output_tokens(),
            );
            let estimate = services.governor.estimate(&id, worst_case).await;
            if let Authorization::Deny(reason) = services.governor.authorize(&id, estimate).await {
                warn!(node = %id, %estimate, %reason, "Reasoning call denied by budget");
                return StopReason::BudgetExceeded(reason);
            }

            if let Err(e) = self
                .manager
                .update_node(&id, |n| n.iteration_count = iteration)
                .await
            {
                return StopReason::Error(e.to_string());
            }
            info!(node = %id, iteration, max_iterations, phase = %node.phase, "Iteration");

            let response = match tokio::time::timeout(
                settings.reasoning_timeout,
                services.reasoning.complete(&request),
            )
            .await
            {
                Err(_) => {
                    warn!(
                        node = %id,
                        iteration,
                        timeout_secs = settings.reasoning_timeout.as_secs(),
                        "Reasoning call timed out"
                    );
                    continue;
                }
                Ok(Err(e)) if e.is_recoverable() => {
                    warn!(node = %id, iteration, error = %e, "Reasoning call failed, retrying");
                    continue;
                }
                Ok(Err(ArborError::Protocol(message))) => {
                    return StopReason::ProtocolError(message);
                }
                Ok(Err(e)) => return StopReason::Error(e.to_string()),
                Ok(Ok(response)) => response,
            };

            if let Err(e) = services.governor.record(&id, &response.cost).await {
                return StopReason::Error(e.to_string());
            }
            debug!(
                node = %id,
                cost = %response.cost.cost,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "Reasoning call recorded"
            );

            if let Err(reason) = check_response(&response) {
                warn!(node = %id, %reason, "Malformed reasoning response");
                return StopReason::ProtocolError(reason);
            }

            messages.push(Message::assistant(response.content.clone()));
            let text = response.text();
            if !text.trim().is_empty() {
                state.last_text = text.clone();
            }

            let invocations: Vec<ToolInvocation> = response
                .tool_uses()
                .into_iter()
                .map(|tu| ToolInvocation::new(tu.id, tu.name, tu.input))
                .collect();

            if invocations.is_empty() {
                self.log_iteration(iteration, text, &[]).await;
                info!(node = %id, iteration, "Final answer without tool calls");
                return StopReason::FinalAnswer;
            }

            let results = self.dispatch(&invocations, ctx, state).await;

            for result in &results {
                if let Some(output) = &result.output {
                    state.absorb(output);
                }
            }
            let calls = results.len() as u32;
            if let Err(e) = self
                .manager
                .update_node(&id, |n| n.tool_call_count += calls)
                .await
            {
                return StopReason::Error(e.to_string());
            }

            messages.push(Message::user(
                results.iter().map(ToolCallResult::to_content_block).collect(),
            ));
            self.log_iteration(iteration, text, &results).await;

            if state.completed {
                info!(node = %id, iteration, "Completion accepted");
                return StopReason::Completed;
            }
        }
    }

    /// Execute one response's tool calls in order
    ///
    /// Runs of ordinary tools go through the dispatcher's batching; each
    /// `report_phase` is answered in place between them. Calls after an
    /// accepted COMPLETE are answered with an error and never run.
    async fn dispatch(
        &self,
        invocations: &[ToolInvocation],
        ctx: &ToolContext,
        state: &mut ExecutionSummary,
    ) -> Vec<ToolCallResult> {
        let tools = &self.manager.services().tools;
        let mut results = Vec::with_capacity(invocations.len());
        let mut pending: Vec<ToolInvocation> = Vec::new();

        for invocation in invocations {
            if state.completed {
                // The gate already passed; nothing may touch the working tree after it
                results.push(ToolCallResult::rejected(
                    invocation,
                    "not run: node already completed",
                ));
                continue;
            }
            if invocation.tool_name == REPORT_PHASE {
                if !pending.is_empty() {
                    results.extend(tools.execute_batch(&pending, ctx).await);
                    pending.clear();
                }
                results.push(self.handle_phase_report(invocation, ctx, state).await);
            } else {
                pending.push(invocation.clone());
            }
        }
        if !pending.is_empty() {
            results.extend(tools.execute_batch(&pending, ctx).await);
        }

        results
    }

    async fn handle_phase_report(
        &self,
        invocation: &ToolInvocation,
        ctx: &ToolContext,
        state: &mut ExecutionSummary,
    ) -> ToolCallResult {
        let id = self.node_id;
        let report = match PhaseReport::from_input(&invocation.input) {
            Ok(report) => report,
            Err(e) => return ToolCallResult::rejected(invocation, e.to_string()),
        };
        let current = match self.manager.get_node(&id).await {
            Some(node) => node.phase,
            None => return ToolCallResult::rejected(invocation, format!("node {} not found", id)),
        };

        match validate_transition(current, report.phase) {
            Err(_) => {
                warn!(node = %id, from = %current, to = %report.phase, "Phase report rejected");
                ToolCallResult::rejected(invocation, rejection_message(current, report.phase))
            }
            Ok(Transition::Advance { from, to, skipped }) => {
                if let Err(e) = self.manager.update_node(&id, |n| n.phase = to).await {
                    return ToolCallResult::rejected(invocation, e.to_string());
                }
                state.note_report(&report);
                info!(node = %id, %from, %to, skipped, "Phase advanced");
                self.manager
                    .emit(SessionEvent::PhaseChanged {
                        node: id,
                        from,
                        to,
                        summary: report.summary.clone(),
                    })
                    .await;
                ToolCallResult::answered(
                    invocation,
                    format!("Moved from {} to {}. {}", from, to, to.guidance()),
                )
            }
            Ok(Transition::RequestCompletion { from }) => {
                let gate = &self.manager.services().gate;
                let decision = gate
                    .can_complete(&ctx.working_directory, ctx.specialization)
                    .await;
                self.manager
                    .emit(SessionEvent::GateChecked {
                        node: id,
                        allowed: decision.allowed,
                        blockers: decision.blockers.iter().map(ToString::to_string).collect(),
                        warnings: decision.warnings.len(),
                    })
                    .await;
                state.last_gate = Some(decision.clone());

                if !decision.allowed {
                    info!(
                        node = %id,
                        blockers = decision.blockers.len(),
                        "Completion refused by gate"
                    );
                    return ToolCallResult::answered(invocation, format_gate_blockers(&decision));
                }

                if let Err(e) = self
                    .manager
                    .update_node(&id, |n| n.phase = Phase::Complete)
                    .await
                {
                    return ToolCallResult::rejected(invocation, e.to_string());
                }
                state.note_report(&report);
                state.completed = true;
                self.manager
                    .emit(SessionEvent::PhaseChanged {
                        node: id,
                        from,
                        to: Phase::Complete,
                        summary: report.summary.clone(),
                    })
                    .await;
                ToolCallResult::answered(invocation, format_gate_accepted(&decision))
            }
        }
    }

    async fn log_iteration(&self, iteration: u32, assistant_text: String, results: &[ToolCallResult]) {
        let Some(node) = self.manager.get_node(&self.node_id).await else {
            return;
        };
        self.manager
            .emit(SessionEvent::IterationCompleted {
                node: self.node_id,
                iteration,
                phase: node.phase,
                cost_so_far: node.cost_so_far,
                assistant_text,
                tools: results
                    .iter()
                    .map(|r| ToolActivity {
                        name: r.tool_name.clone(),
                        success: r.success,
                        duration_ms: r.duration_ms,
                    })
                    .collect(),
            })
            .await;
    }
}

/// Reject responses the loop cannot answer correctly
///
/// Every tool-use id must be non-empty and unique so each result can be
/// matched to its call.
fn check_response(response: &ReasoningResponse) -> std::result::Result<(), String> {
    if response.content.is_empty() {
        return Err("reasoning response has no content".to_string());
    }
    let mut seen = std::collections::HashSet::new();
    for tool_use in response.tool_uses() {
        if tool_use.id.trim().is_empty() {
            return Err(format!("tool_use block for '{}' has an empty id", tool_use.name));
        }
        if !seen.insert(tool_use.id.clone()) {
            return Err(format!("duplicate tool_use id '{}'", tool_use.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_agent::{ContentBlock, CostEvent, Usage};
    use arbor_core::Usd;
    use serde_json::json;

    fn response(content: Vec<ContentBlock>) -> ReasoningResponse {
        let usage = Usage::new(10, 10);
        ReasoningResponse {
            content,
            usage,
            stop_reason: None,
            cost: CostEvent::flat("test", usage, Usd::from_cents(1)),
        }
    }

    fn tool_use(id: &str) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.into(),
            name: "list_files".into(),
            input: json!({}),
        }
    }

    #[test]
    fn test_check_response_accepts_unique_ids() {
        let r = response(vec![ContentBlock::text("hi"), tool_use("a"), tool_use("b")]);
        assert!(check_response(&r).is_ok());
    }

    #[test]
    fn test_check_response_rejects_duplicates_and_blanks() {
        assert!(check_response(&response(vec![tool_use("a"), tool_use("a")]))
            .unwrap_err()
            .contains("duplicate"));
        assert!(check_response(&response(vec![tool_use(" ")])).is_err());
        assert!(check_response(&response(vec![])).is_err());
    }

    #[test]
    fn test_outcome_prefers_phase_summaries() {
        let mut state = ExecutionSummary {
            last_text: "final words".into(),
            ..Default::default()
        };
        assert_eq!(
            std::mem::take(&mut state).into_outcome().summary,
            "final words"
        );

        let mut state = ExecutionSummary::default();
        state.note_report(&PhaseReport {
            phase: Phase::Plan,
            summary: Some("mapped the parser".into()),
            next_steps: vec!["write tests".into()],
        });
        state.absorb(&ToolOutput::text("ok").created("src/a.rs"));
        state.absorb(&ToolOutput::text("ok").created("src/a.rs"));
        let outcome = state.into_outcome();
        assert_eq!(outcome.summary, "PLAN: mapped the parser");
        assert_eq!(outcome.next_steps, vec!["write tests".to_string()]);
        assert_eq!(outcome.files_created, vec!["src/a.rs".to_string()]);
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = ArborConfig::default();
        config.engine.max_iterations = 7;
        config.models.default = "haiku".into();
        let settings = EngineSettings::from_config(&config).unwrap();
        assert_eq!(settings.model, Model::Haiku);
        assert_eq!(settings.max_iterations, 7);

        config.models.default = "gpt".into();
        assert!(EngineSettings::from_config(&config).is_err());
    }
}
