//! The uniform tool contract

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arbor_agent::ToolSchema;
use arbor_core::config::ArborConfig;
use arbor_core::{AgentId, AgentTree, ArborError, Result, Specialization};

/// Default per-call tool timeout
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Output of a successful tool call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// Text fed back to the reasoning engine
    pub content: String,
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
    pub files_deleted: Vec<String>,
    /// Structured payload for callers that want more than text
    pub data: Option<Value>,
    /// The tool ran but its result should be flagged as an error
    /// (a failed child agent, a non-zero exit)
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// A completed call whose result is a failure the engine should see
    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn created(mut self, path: impl Into<String>) -> Self {
        self.files_created.push(path.into());
        self
    }

    pub fn modified(mut self, path: impl Into<String>) -> Self {
        self.files_modified.push(path.into());
        self
    }

    pub fn deleted(mut self, path: impl Into<String>) -> Self {
        self.files_deleted.push(path.into());
        self
    }
}

/// Bounded execution context for one tool call
#[derive(Clone)]
pub struct ToolContext {
    /// Id of the calling node
    pub session_id: AgentId,
    pub parent_session_id: Option<AgentId>,
    pub specialization: Option<Specialization>,
    pub working_directory: PathBuf,
    /// Node branch; the git tool checks out its ref by default
    pub branch: String,
    /// Mutating tools log their intended effect and perform none
    pub dry_run: bool,
    pub timeout: Duration,
    pub protected_files: Arc<[String]>,
    /// Handle for tree-aware tools; None outside an agent tree
    pub tree: Option<Arc<dyn AgentTree>>,
}

impl ToolContext {
    pub fn new(session_id: AgentId, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            session_id,
            parent_session_id: None,
            specialization: None,
            working_directory: working_directory.into(),
            branch: String::new(),
            dry_run: false,
            timeout: DEFAULT_TOOL_TIMEOUT,
            protected_files: ArborConfig::default().protected_files.into(),
            tree: None,
        }
    }

    pub fn with_parent(mut self, parent: Option<AgentId>) -> Self {
        self.parent_session_id = parent;
        self
    }

    pub fn with_specialization(mut self, specialization: Specialization) -> Self {
        self.specialization = Some(specialization);
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_protected_files(mut self, files: Vec<String>) -> Self {
        self.protected_files = files.into();
        self
    }

    pub fn with_tree(mut self, tree: Arc<dyn AgentTree>) -> Self {
        self.tree = Some(tree);
        self
    }

    /// The tree handle, or a configuration error naming the tool
    pub fn require_tree(&self, tool: &str) -> Result<&Arc<dyn AgentTree>> {
        self.tree.as_ref().ok_or_else(|| {
            ArborError::ToolConfiguration(format!(
                "{} needs an agent tree, but this context has none",
                tool
            ))
        })
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("parent_session_id", &self.parent_session_id)
            .field("specialization", &self.specialization)
            .field("working_directory", &self.working_directory)
            .field("branch", &self.branch)
            .field("dry_run", &self.dry_run)
            .field("timeout", &self.timeout)
            .field("tree", &self.tree.is_some())
            .finish()
    }
}

/// A tool the reasoning engine can call
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the input object
    fn input_schema(&self) -> Value;

    /// Read-only tools may run concurrently within one batch
    fn read_only(&self) -> bool {
        false
    }

    /// Tree-aware tools need `ToolContext::tree` and are not bound by the tool timeout
    fn tree_aware(&self) -> bool {
        false
    }

    async fn execute(&self, input: &Value, ctx: &ToolContext) -> Result<ToolOutput>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Deserialize a tool's input object, reporting failures as invalid input
pub fn parse_input<T: DeserializeOwned>(tool: &str, input: &Value) -> Result<T> {
    serde_json::from_value(input.clone())
        .map_err(|e| ArborError::InvalidInput(format!("{}: {}", tool, e)))
}

/// Trim long tool output, keeping the head
pub fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated {} bytes]", &text[..end], text.len() - end)
}
