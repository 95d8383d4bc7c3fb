//! # arbor-tools
//!
//! Tools an Arbor agent can call, and the dispatcher that runs them.
//!
//! Every tool implements [`Tool`]: a name, a description, a JSON input
//! schema and an async `execute`. The [`ToolDispatcher`] looks tools up by
//! name and runs each call with a timeout and panic guard, so a misbehaving
//! tool only ever produces a failed [`ToolCallResult`].
//!
//! Built-in tools:
//! - `read_file`, `list_files`, `write_file`, `delete_file`
//! - `run_command`, `git`
//! - `report_phase` (handled by the engine)
//! - `summon_agent`, `coordinate_agents`, `get_agent_status` (need an agent tree)

mod dispatcher;
mod fs;
mod git;
mod path;
mod phase;
mod shell;
mod tool;
mod tree_tools;

pub use dispatcher::{ToolCallResult, ToolDispatcher, ToolInvocation};
pub use fs::{DeleteFileTool, ListFilesTool, ReadFileTool, WriteFileTool};
pub use git::GitTool;
pub use path::{validate_path, PathAccess};
pub use phase::{PhaseReport, ReportPhaseTool, REPORT_PHASE};
pub use shell::RunCommandTool;
pub use tool::{parse_input, truncate, Tool, ToolContext, ToolOutput, DEFAULT_TOOL_TIMEOUT};
pub use tree_tools::{
    CoordinateAgentsTool, GetAgentStatusTool, SummonAgentTool, COORDINATE_AGENTS, GET_AGENT_STATUS,
    SUMMON_AGENT,
};
