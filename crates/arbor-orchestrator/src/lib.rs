//! # arbor-orchestrator
//!
//! Runs a tree of agents for Arbor.
//!
//! This crate provides:
//! - [`AgentTreeManager`], the owner of the node registry and spawn rules
//! - [`PhaseEngine`], the per-node reasoning loop
//! - [`BudgetGovernor`], pre-call authorization and cost roll-up
//! - Session sinks, including the markdown [`ActivityLogger`]

mod activity_logger;
mod budget;
mod engine;
mod phases;
mod prompt;
mod query;
mod tree;

pub use activity_logger::{ActivityLogger, NullSink, SessionEvent, SessionSink, ToolActivity};
pub use budget::{Authorization, BudgetGovernor, BudgetSnapshot, CostSink, Principal};
pub use engine::{EngineSettings, PhaseEngine};
pub use phases::{rejection_message, remaining_phases, validate_transition, Transition};
pub use prompt::{build_system_prompt, initial_message, PromptContext};
pub use query::{preorder, render_tree, tree_status};
pub use tree::{AgentTreeManager, RootConfig, TreeServices};
