//! Agent tree manager: the node registry and the rules for spawning
//!
//! One manager owns one tree. It is the only writer of the node registry;
//! engines publish their phase and counters through it, and tree-aware tools
//! reach it through the [`AgentTree`] trait.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use arbor_agent::ReasoningClient;
use arbor_core::config::ArborConfig;
use arbor_core::fail_open::fail_open;
use arbor_core::{
    AgentId, AgentNode, AgentResult, AgentStatus, AgentTree, ArborError, NodeOutcome, Phase,
    Result, Specialization, SpawnRequest, StatusQuery, StopReason, TreeStatus, Usd,
};
use arbor_tools::ToolDispatcher;
use arbor_validation::CompletionGate;

use crate::activity_logger::{SessionEvent, SessionSink};
use crate::budget::BudgetGovernor;
use crate::engine::{EngineSettings, PhaseEngine};
use crate::query::{preorder, render_tree, tree_status};

/// External collaborators shared by every engine in a tree
#[derive(Clone)]
pub struct TreeServices {
    pub reasoning: Arc<dyn ReasoningClient>,
    pub tools: Arc<ToolDispatcher>,
    pub gate: Arc<dyn CompletionGate>,
    pub governor: Arc<BudgetGovernor>,
    pub sink: Arc<dyn SessionSink>,
}

/// Everything needed to plant a tree
#[derive(Debug, Clone)]
pub struct RootConfig {
    pub vision: String,
    pub working_directory: PathBuf,
    pub budget_ceiling: Usd,
    pub max_depth: u32,
    pub specialization: Specialization,
    pub start_phase: Phase,
    /// Share of a parent's remaining budget a child gets when it asks for none
    pub child_default_fraction: f64,
    pub engine: EngineSettings,
}

impl RootConfig {
    pub fn new(vision: impl Into<String>, working_directory: impl Into<PathBuf>, budget_ceiling: Usd) -> Self {
        Self {
            vision: vision.into(),
            working_directory: working_directory.into(),
            budget_ceiling,
            max_depth: 3,
            specialization: Specialization::General,
            start_phase: Phase::Explore,
            child_default_fraction: 0.5,
            engine: EngineSettings::default(),
        }
    }

    /// Root settings from repository configuration
    pub fn from_config(
        config: &ArborConfig,
        vision: impl Into<String>,
        working_directory: impl Into<PathBuf>,
    ) -> Result<Self> {
        Ok(Self {
            vision: vision.into(),
            working_directory: working_directory.into(),
            budget_ceiling: Usd::from_dollars_f64(config.budget.default_ceiling_usd),
            max_depth: config.engine.max_depth,
            specialization: Specialization::General,
            start_phase: config.engine.start_phase,
            child_default_fraction: config.budget.child_default_fraction,
            engine: EngineSettings::from_config(config)?,
        })
    }
}

struct TreeRegistry {
    nodes: HashMap<AgentId, AgentNode>,
    /// Nodes whose engine has been started; each node runs at most once
    started: HashSet<AgentId>,
    iteration_limits: HashMap<AgentId, u32>,
}

/// Owner of one agent tree
pub struct AgentTreeManager {
    me: Weak<AgentTreeManager>,
    root: AgentId,
    services: TreeServices,
    max_depth: u32,
    child_default_fraction: f64,
    settings: EngineSettings,
    registry: RwLock<TreeRegistry>,
    /// Per-parent turn lock held across spawn and run of a child
    child_queues: Mutex<HashMap<AgentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl AgentTreeManager {
    /// Create the root node and the manager that owns its tree
    pub async fn create_root(services: TreeServices, config: RootConfig) -> Result<(Arc<Self>, AgentNode)> {
        if config.vision.trim().is_empty() {
            return Err(ArborError::InvalidInput("vision cannot be empty".to_string()));
        }

        let id = AgentId::new();
        let root = AgentNode {
            id,
            parent_id: None,
            depth: 0,
            vision: config.vision,
            working_directory: config.working_directory,
            specialization: config.specialization,
            phase: config.start_phase,
            status: AgentStatus::Running,
            branch: format!("arbor/{}", id.short()),
            iteration_count: 0,
            tool_call_count: 0,
            start_time: Utc::now(),
            end_time: None,
            cost_so_far: Usd::ZERO,
            budget_ceiling: config.budget_ceiling,
            children: Vec::new(),
            result: None,
            stop_reason: None,
        };

        services.governor.open_root(id, config.budget_ceiling).await;

        let registry = TreeRegistry {
            nodes: HashMap::from([(id, root.clone())]),
            started: HashSet::new(),
            iteration_limits: HashMap::from([(id, config.engine.max_iterations)]),
        };

        let manager = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            root: id,
            services,
            max_depth: config.max_depth,
            child_default_fraction: config.child_default_fraction,
            settings: config.engine,
            registry: RwLock::new(registry),
            child_queues: Mutex::new(HashMap::new()),
        });

        info!(
            root = %id,
            branch = %root.branch,
            budget = %root.budget_ceiling,
            max_depth = manager.max_depth,
            "Created agent tree"
        );
        manager.emit(started_event(&root)).await;

        Ok((manager, root))
    }

    pub fn root_id(&self) -> AgentId {
        self.root
    }

    pub fn services(&self) -> &TreeServices {
        &self.services
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    fn handle(&self) -> Result<Arc<Self>> {
        self.me
            .upgrade()
            .ok_or_else(|| ArborError::Tree("agent tree manager was dropped".to_string()))
    }

    fn child_queue(&self, parent: &AgentId) -> Arc<tokio::sync::Mutex<()>> {
        let mut queues = self
            .child_queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        queues.entry(*parent).or_default().clone()
    }

    /// Drop a parent's queue once no caller is waiting on it
    fn release_child_queue(&self, parent: &AgentId, queue: Arc<tokio::sync::Mutex<()>>) {
        let mut queues = self
            .child_queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let ours = queues.get(parent).is_some_and(|q| Arc::ptr_eq(q, &queue));
        // One reference in the map, one here
        if ours && Arc::strong_count(&queue) == 2 {
            queues.remove(parent);
        }
    }

    pub(crate) async fn emit(&self, event: SessionEvent) {
        fail_open("session_sink::append", || self.services.sink.append(&event)).await;
    }

    /// Create a child under `parent` without running it
    ///
    /// Rejects outright when the child would be too deep, when the parent
    /// already has a running child, or when the parent is finished.
    pub async fn spawn_child(&self, parent_id: &AgentId, request: SpawnRequest) -> Result<AgentNode> {
        if request.vision.trim().is_empty() {
            return Err(ArborError::InvalidInput("child vision cannot be empty".to_string()));
        }

        let child = {
            let mut registry = self.registry.write().await;
            let parent = registry
                .nodes
                .get(parent_id)
                .ok_or_else(|| ArborError::NodeNotFound(parent_id.to_string()))?;

            if parent.status.is_terminal() {
                return Err(ArborError::Tree(format!(
                    "{} is {} and cannot spawn children",
                    parent_id, parent.status
                )));
            }

            let depth = parent.depth + 1;
            if depth > self.max_depth {
                return Err(ArborError::DepthExceeded {
                    parent: parent_id.to_string(),
                    requested: depth,
                    max: self.max_depth,
                });
            }

            if let Some(active) = parent
                .children
                .iter()
                .find(|c| registry.nodes.get(c).map_or(false, AgentNode::is_active))
            {
                return Err(ArborError::SequentialConstraintViolation {
                    parent: parent_id.to_string(),
                    active_child: active.to_string(),
                });
            }

            let id = AgentId::new();
            let ceiling = self
                .services
                .governor
                .open_child(parent_id, id, request.budget, self.child_default_fraction)
                .await?;

            let child = AgentNode {
                id,
                parent_id: Some(*parent_id),
                depth,
                vision: request.vision,
                working_directory: parent.working_directory.clone(),
                specialization: request.specialization,
                phase: request.start_phase.unwrap_or_default(),
                status: AgentStatus::Running,
                branch: format!("{}/{}", parent.branch, parent.children.len()),
                iteration_count: 0,
                tool_call_count: 0,
                start_time: Utc::now(),
                end_time: None,
                cost_so_far: Usd::ZERO,
                budget_ceiling: ceiling,
                children: Vec::new(),
                result: None,
                stop_reason: None,
            };

            let limit = request.max_iterations.unwrap_or(self.settings.max_iterations).max(1);
            registry.iteration_limits.insert(id, limit);
            if let Some(parent) = registry.nodes.get_mut(parent_id) {
                parent.children.push(id);
            }
            registry.nodes.insert(id, child.clone());
            child
        };

        info!(
            parent = %parent_id,
            child = %child.id,
            depth = child.depth,
            specialization = %child.specialization,
            budget = %child.budget_ceiling,
            branch = %child.branch,
            "Spawned child agent"
        );
        self.emit(started_event(&child)).await;
        Ok(child)
    }

    /// Spawn a child and drive it to a terminal status
    ///
    /// Concurrent callers for the same parent wait their turn.
    pub async fn run_child(&self, parent: &AgentId, request: SpawnRequest) -> Result<AgentResult> {
        let queue = self.child_queue(parent);
        let result = {
            let _turn = queue.lock().await;
            match self.spawn_child(parent, request).await {
                Ok(child) => self.run_node(&child.id).await,
                Err(e) => Err(e),
            }
        };
        self.release_child_queue(parent, queue);
        result
    }

    /// Drive an existing node's engine to a terminal status
    pub async fn run_node(&self, id: &AgentId) -> Result<AgentResult> {
        {
            let mut registry = self.registry.write().await;
            let node = registry
                .nodes
                .get(id)
                .ok_or_else(|| ArborError::NodeNotFound(id.to_string()))?;
            if node.status.is_terminal() {
                return Err(ArborError::Tree(format!("{} is already {}", id, node.status)));
            }
            if !registry.started.insert(*id) {
                return Err(ArborError::Tree(format!("{} is already running", id)));
            }
        }

        let engine = PhaseEngine::new(self.handle()?, *id);
        Box::pin(engine.run()).await
    }

    pub async fn run_root(&self) -> Result<AgentResult> {
        self.run_node(&self.root).await
    }

    /// Mark a node and its running descendants cancelled
    ///
    /// Engines notice before their next reasoning call. Returns how many
    /// nodes changed status.
    pub async fn cancel(&self, id: &AgentId) -> Result<usize> {
        let mut registry = self.registry.write().await;
        if !registry.nodes.contains_key(id) {
            return Err(ArborError::NodeNotFound(id.to_string()));
        }
        let now = Utc::now();
        let subtree: Vec<AgentId> = preorder(&registry.nodes, id).iter().map(|n| n.id).collect();
        let mut cancelled = 0;
        for node_id in subtree {
            if let Some(node) = registry.nodes.get_mut(&node_id) {
                if node.is_active() {
                    node.status = AgentStatus::Cancelled;
                    node.stop_reason = Some(StopReason::Cancelled);
                    node.end_time = Some(now);
                    cancelled += 1;
                }
            }
        }
        warn!(node = %id, cancelled, "Cancelled agent subtree");
        Ok(cancelled)
    }

    /// Fill costs and ceilings from the governor
    async fn with_costs(&self, mut nodes: Vec<AgentNode>) -> Vec<AgentNode> {
        let ids: Vec<AgentId> = nodes.iter().map(|n| n.id).collect();
        let snapshots = self.services.governor.snapshots(&ids).await;
        for node in &mut nodes {
            if let Some(snapshot) = snapshots.get(&node.id) {
                node.cost_so_far = snapshot.cost_so_far;
                node.budget_ceiling = snapshot.ceiling;
            }
        }
        nodes
    }

    /// Snapshot of a node, with cost read from the governor
    pub async fn get_node(&self, id: &AgentId) -> Option<AgentNode> {
        let node = self.registry.read().await.nodes.get(id).cloned()?;
        self.with_costs(vec![node]).await.pop()
    }

    /// Every node in pre-order, with costs
    pub async fn nodes(&self) -> Vec<AgentNode> {
        let ordered = {
            let registry = self.registry.read().await;
            preorder(&registry.nodes, &self.root)
        };
        self.with_costs(ordered).await
    }

    pub async fn get_tree_status(&self, query: &StatusQuery) -> TreeStatus {
        let ordered = self.nodes().await;
        let root_cost = ordered
            .iter()
            .find(|n| n.id == self.root)
            .map(|n| n.cost_so_far)
            .unwrap_or(Usd::ZERO);
        tree_status(ordered, query, root_cost)
    }

    pub async fn get_tree_visualization(&self) -> String {
        render_tree(&self.nodes().await)
    }

    pub(crate) async fn is_cancelled(&self, id: &AgentId) -> bool {
        self.registry
            .read()
            .await
            .nodes
            .get(id)
            .map_or(false, |n| n.status == AgentStatus::Cancelled)
    }

    pub(crate) async fn iteration_limit(&self, id: &AgentId) -> u32 {
        self.registry
            .read()
            .await
            .iteration_limits
            .get(id)
            .copied()
            .unwrap_or(self.settings.max_iterations)
    }

    /// Apply an engine's change to its node; status is never touched here
    pub(crate) async fn update_node<F>(&self, id: &AgentId, f: F) -> Result<()>
    where
        F: FnOnce(&mut AgentNode) + Send,
    {
        let snapshot = {
            let mut registry = self.registry.write().await;
            let node = registry
                .nodes
                .get_mut(id)
                .ok_or_else(|| ArborError::NodeNotFound(id.to_string()))?;
            let status = node.status;
            f(node);
            node.status = status;
            node.clone()
        };
        fail_open("session_sink::update", || self.services.sink.update(&snapshot)).await;
        Ok(())
    }

    /// Record a node's terminal status and build its result
    ///
    /// A node cancelled from outside stays cancelled whatever the engine saw.
    pub(crate) async fn finish_node(
        &self,
        id: &AgentId,
        stop_reason: StopReason,
        mut outcome: NodeOutcome,
    ) -> Result<AgentResult> {
        let cost = self.services.governor.spent(id).await;

        let (result, snapshot) = {
            let mut registry = self.registry.write().await;
            let node = registry
                .nodes
                .get_mut(id)
                .ok_or_else(|| ArborError::NodeNotFound(id.to_string()))?;

            let stop_reason = if node.status == AgentStatus::Cancelled {
                StopReason::Cancelled
            } else {
                stop_reason
            };
            let status = if node.status.is_terminal() {
                node.status
            } else {
                stop_reason.terminal_status()
            };
            let success = stop_reason.is_success() && status == AgentStatus::Completed;
            if !success && outcome.error.is_none() {
                outcome.error = Some(stop_reason.describe());
            }

            node.status = status;
            node.end_time.get_or_insert_with(Utc::now);
            node.stop_reason = Some(stop_reason.clone());
            node.result = Some(outcome.clone());
            node.cost_so_far = cost;

            let result = AgentResult {
                node_id: *id,
                success,
                status,
                phase: node.phase,
                stop_reason,
                outcome,
                cost,
                iterations: node.iteration_count,
                tool_calls: node.tool_call_count,
            };
            (result, node.clone())
        };

        info!(
            node = %id,
            status = %result.status,
            stop_reason = %result.stop_reason,
            cost = %result.cost,
            iterations = result.iterations,
            "Agent finished"
        );
        debug!(node = %id, files = ?result.outcome.files_touched(), "Agent outcome");

        fail_open("session_sink::update", || self.services.sink.update(&snapshot)).await;
        self.emit(SessionEvent::NodeFinished {
            node: *id,
            stop_reason: result.stop_reason.clone(),
            cost: result.cost,
            iterations: result.iterations,
        })
        .await;

        Ok(result)
    }
}

fn started_event(node: &AgentNode) -> SessionEvent {
    SessionEvent::NodeStarted {
        node: node.id,
        parent: node.parent_id,
        depth: node.depth,
        specialization: node.specialization,
        branch: node.branch.clone(),
        vision: node.vision.clone(),
        budget_ceiling: node.budget_ceiling,
    }
}

#[async_trait]
impl AgentTree for AgentTreeManager {
    async fn summon(&self, parent: &AgentId, request: SpawnRequest) -> Result<AgentResult> {
        self.run_child(parent, request).await
    }

    async fn status(&self, query: &StatusQuery) -> TreeStatus {
        self.get_tree_status(query).await
    }

    async fn node(&self, id: &AgentId) -> Option<AgentNode> {
        self.get_node(id).await
    }

    async fn visualize(&self) -> String {
        self.get_tree_visualization().await
    }
}
