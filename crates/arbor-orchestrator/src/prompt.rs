//! Prompt builder for agent conversations
//!
//! The system prompt is rebuilt before every reasoning call so it always
//! reflects the node's current phase, iteration and budget.

use arbor_core::{AgentNode, Phase, Usd};
use arbor_validation::GateDecision;

/// Facts about a node's situation that go into its system prompt
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub node: &'a AgentNode,
    pub iteration: u32,
    pub max_iterations: u32,
    pub max_depth: u32,
    pub spent: Usd,
    pub remaining: Usd,
}

/// Build the system prompt for the next reasoning call
pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
    let node = ctx.node;
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "# ARBOR AGENT {} - Iteration {} of {}\n\n",
        node.id.short(),
        ctx.iteration,
        ctx.max_iterations
    ));

    prompt.push_str(&format!(
        "You are a {} agent. Focus on {}.\n",
        node.specialization,
        node.specialization.focus()
    ));
    prompt.push_str(&format!(
        "Working directory: {}\nBranch: {}\n\n",
        node.working_directory.display(),
        node.branch
    ));

    // Phases
    prompt.push_str("## PHASES\n\n");
    for phase in Phase::ALL {
        let marker = if phase == node.phase {
            "->"
        } else if phase < node.phase {
            "ok"
        } else {
            "  "
        };
        prompt.push_str(&format!("{} {}: {}\n", marker, phase, phase.guidance()));
    }
    prompt.push_str(&format!(
        "\nYou are in {}. Call `report_phase` to move forward; phases never go back, \
         but you may skip ahead. Reporting COMPLETE runs compile and test checks; \
         it is refused while any blocker remains, so fix blockers and report again.\n\n",
        node.phase
    ));

    // Delegation
    prompt.push_str("## DELEGATION\n\n");
    if node.depth < ctx.max_depth {
        prompt.push_str(
            "You may summon child agents with `summon_agent` or `coordinate_agents`. \
             Children run one at a time, and each child's budget is carved out of yours. \
             A failed child does not fail you; read its report and decide what to do.\n",
        );
    } else {
        prompt.push_str(&format!(
            "You are at depth {} of {}. You cannot summon children; do the work yourself.\n",
            node.depth, ctx.max_depth
        ));
    }
    prompt.push('\n');

    // Budget
    prompt.push_str("## BUDGET\n\n");
    prompt.push_str(&format!(
        "Spent {} of {} ({} left). When the budget runs out you are stopped mid-task, \
         so prefer a few well-aimed tool calls.\n\n",
        ctx.spent, node.budget_ceiling, ctx.remaining
    ));

    prompt.push_str("## FINISHING\n\n");
    prompt.push_str(
        "Answering without any tool call ends your run with that answer. \
         To finish with validated work, report COMPLETE instead.\n",
    );

    prompt
}

/// First user message of a node's conversation
pub fn initial_message(node: &AgentNode) -> String {
    let mut msg = format!("## VISION\n\n{}\n\n", node.vision.trim());
    if node.phase != Phase::Explore {
        msg.push_str(&format!(
            "You start in {}; earlier phases are already done.\n",
            node.phase
        ));
    }
    msg
}

/// Tool result text for a refused COMPLETE
pub fn format_gate_blockers(decision: &GateDecision) -> String {
    format!(
        "COMPLETE refused by the completion gate. Resolve these and report COMPLETE again.\n\n{}",
        decision.describe()
    )
}

/// Tool result text for an accepted COMPLETE
pub fn format_gate_accepted(decision: &GateDecision) -> String {
    if decision.warnings.is_empty() {
        "COMPLETE accepted: all completion checks passed.".to_string()
    } else {
        format!("COMPLETE accepted with warnings.\n\n{}", decision.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{AgentId, AgentStatus, Severity, Specialization};
    use arbor_validation::ValidationIssue;
    use chrono::Utc;
    use std::path::PathBuf;

    fn node(depth: u32, phase: Phase) -> AgentNode {
        AgentNode {
            id: AgentId::new(),
            parent_id: None,
            depth,
            vision: "Add a CSV exporter".into(),
            working_directory: PathBuf::from("/repo"),
            specialization: Specialization::Backend,
            phase,
            status: AgentStatus::Running,
            branch: "arbor/abc/0".into(),
            iteration_count: 0,
            tool_call_count: 0,
            start_time: Utc::now(),
            end_time: None,
            cost_so_far: Usd::ZERO,
            budget_ceiling: Usd::from_dollars(2),
            children: Vec::new(),
            result: None,
            stop_reason: None,
        }
    }

    fn ctx(node: &AgentNode, max_depth: u32) -> PromptContext<'_> {
        PromptContext {
            node,
            iteration: 3,
            max_iterations: 10,
            max_depth,
            spent: Usd::from_cents(50),
            remaining: Usd::from_cents(150),
        }
    }

    #[test]
    fn test_prompt_reflects_phase_and_budget() {
        let n = node(0, Phase::Plan);
        let prompt = build_system_prompt(&ctx(&n, 2));
        assert!(prompt.contains("Iteration 3 of 10"));
        assert!(prompt.contains("-> PLAN"));
        assert!(prompt.contains("ok EXPLORE"));
        assert!(prompt.contains("backend agent"));
        assert!(prompt.contains("Spent $0.5000 of $2.0000"));
        assert!(prompt.contains("summon_agent"));
    }

    #[test]
    fn test_prompt_at_max_depth_forbids_summoning() {
        let n = node(2, Phase::Explore);
        let prompt = build_system_prompt(&ctx(&n, 2));
        assert!(prompt.contains("cannot summon children"));
    }

    #[test]
    fn test_initial_message_mentions_start_phase() {
        assert!(!initial_message(&node(0, Phase::Explore)).contains("You start in"));
        assert!(initial_message(&node(0, Phase::Found)).contains("You start in FOUND"));
    }

    #[test]
    fn test_blocker_formatting() {
        let decision = GateDecision::from_issues(vec![ValidationIssue::new(
            "compile",
            Severity::Critical,
            "missing semicolon",
        )
        .at("src/lib.rs", Some(7))]);
        let text = format_gate_blockers(&decision);
        assert!(text.starts_with("COMPLETE refused"));
        assert!(text.contains("src/lib.rs:7"));
    }
}
