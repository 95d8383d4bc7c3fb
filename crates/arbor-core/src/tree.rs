//! The seam between tree-aware tools and the agent tree manager
//!
//! Tools only see this trait, so the tool crate never depends on the
//! orchestrator that owns the node registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Usd;
use crate::types::{AgentId, AgentNode, AgentResult, AgentStatus, Phase, Specialization};
use crate::Result;

/// A request from a running agent to summon a child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub specialization: Specialization,
    pub vision: String,
    /// Requested carve-out; capped at the parent's remaining budget
    pub budget: Option<Usd>,
    pub start_phase: Option<Phase>,
    pub max_iterations: Option<u32>,
}

impl SpawnRequest {
    pub fn new(specialization: Specialization, vision: impl Into<String>) -> Self {
        Self {
            specialization,
            vision: vision.into(),
            budget: None,
            start_phase: None,
            max_iterations: None,
        }
    }

    pub fn with_budget(mut self, budget: Usd) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_start_phase(mut self, phase: Phase) -> Self {
        self.start_phase = Some(phase);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }
}

/// Filters for status queries; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusFilter {
    pub status: Option<AgentStatus>,
    pub specialization: Option<Specialization>,
    pub phase: Option<Phase>,
    pub min_depth: Option<u32>,
    pub max_depth: Option<u32>,
}

impl StatusFilter {
    pub fn matches(&self, node: &AgentNode) -> bool {
        self.status.map_or(true, |s| node.status == s)
            && self.specialization.map_or(true, |s| node.specialization == s)
            && self.phase.map_or(true, |p| node.phase == p)
            && self.min_depth.map_or(true, |d| node.depth >= d)
            && self.max_depth.map_or(true, |d| node.depth <= d)
    }
}

/// Sort order for status queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Pre-order walk of the tree (parents before children, spawn order)
    #[default]
    Tree,
    StartTime,
    Depth,
    Specialization,
    Status,
    Duration,
}

impl SortKey {
    /// Stable sort; ties keep the incoming (tree) order
    ///
    /// Running nodes are timed up to the newest timestamp in the listing, so
    /// sorting the same nodes twice gives the same order.
    pub fn sort(&self, nodes: &mut [AgentNode]) {
        let now = latest_timestamp(nodes);
        match self {
            Self::Tree => {}
            Self::StartTime => nodes.sort_by_key(|n| n.start_time),
            Self::Depth => nodes.sort_by_key(|n| n.depth),
            Self::Specialization => nodes.sort_by_key(|n| n.specialization),
            Self::Status => nodes.sort_by_key(|n| n.status.to_string()),
            Self::Duration => nodes.sort_by_key(|n| std::cmp::Reverse(n.duration_ms(now))),
        }
    }
}

fn latest_timestamp(nodes: &[AgentNode]) -> DateTime<Utc> {
    nodes
        .iter()
        .flat_map(|n| std::iter::once(n.start_time).chain(n.end_time))
        .max()
        .unwrap_or_default()
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tree" => Ok(Self::Tree),
            "start_time" | "starttime" | "start" => Ok(Self::StartTime),
            "depth" => Ok(Self::Depth),
            "specialization" => Ok(Self::Specialization),
            "status" => Ok(Self::Status),
            "duration" => Ok(Self::Duration),
            _ => Err(format!("Invalid sort key: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusQuery {
    pub filter: StatusFilter,
    pub sort: SortKey,
}

/// Point-in-time snapshot of a tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeStatus {
    pub tree: Vec<AgentNode>,
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub cancelled_nodes: usize,
    /// Deepest depth present among the listed nodes
    pub max_depth: u32,
    pub total_cost: Usd,
}

impl TreeStatus {
    /// Build counts from an already filtered and sorted node list
    pub fn from_nodes(tree: Vec<AgentNode>) -> Self {
        let count = |status: AgentStatus| tree.iter().filter(|n| n.status == status).count();
        let total_cost = tree
            .iter()
            .filter(|n| n.is_root())
            .map(|n| n.cost_so_far)
            .sum();

        Self {
            total_nodes: tree.len(),
            active_nodes: count(AgentStatus::Running),
            completed_nodes: count(AgentStatus::Completed),
            failed_nodes: count(AgentStatus::Failed),
            cancelled_nodes: count(AgentStatus::Cancelled),
            max_depth: tree.iter().map(|n| n.depth).max().unwrap_or(0),
            total_cost,
            tree,
        }
    }
}

/// Operations tree-aware tools may perform on the agent tree
#[async_trait]
pub trait AgentTree: Send + Sync {
    /// Spawn a child under `parent` and run it to a terminal status
    ///
    /// Spawn violations (depth, sequential) are returned as errors; a child
    /// that runs and fails is returned as an unsuccessful [`AgentResult`].
    async fn summon(&self, parent: &AgentId, request: SpawnRequest) -> Result<AgentResult>;

    /// Snapshot of the tree filtered and sorted per the query
    async fn status(&self, query: &StatusQuery) -> TreeStatus;

    /// Snapshot of a single node
    async fn node(&self, id: &AgentId) -> Option<AgentNode>;

    /// Indented text rendering of the tree
    async fn visualize(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn node(depth: u32, status: AgentStatus, spec: Specialization) -> AgentNode {
        AgentNode {
            id: AgentId::new(),
            parent_id: if depth == 0 { None } else { Some(AgentId::new()) },
            depth,
            vision: "v".into(),
            working_directory: PathBuf::from("."),
            specialization: spec,
            phase: Phase::Explore,
            status,
            branch: "arbor/x".into(),
            iteration_count: 0,
            tool_call_count: 0,
            start_time: Utc::now(),
            end_time: None,
            cost_so_far: Usd::from_cents(depth as i64 + 1),
            budget_ceiling: Usd::from_dollars(1),
            children: Vec::new(),
            result: None,
            stop_reason: None,
        }
    }

    #[test]
    fn test_filter_matches() {
        let n = node(2, AgentStatus::Running, Specialization::Backend);
        assert!(StatusFilter::default().matches(&n));
        let f = StatusFilter {
            specialization: Some(Specialization::Backend),
            min_depth: Some(1),
            max_depth: Some(2),
            ..Default::default()
        };
        assert!(f.matches(&n));
        let f = StatusFilter {
            status: Some(AgentStatus::Failed),
            ..Default::default()
        };
        assert!(!f.matches(&n));
    }

    #[test]
    fn test_sort_by_depth_is_stable() {
        let mut nodes = vec![
            node(2, AgentStatus::Running, Specialization::General),
            node(0, AgentStatus::Running, Specialization::General),
            node(1, AgentStatus::Running, Specialization::General),
        ];
        SortKey::Depth.sort(&mut nodes);
        let depths: Vec<u32> = nodes.iter().map(|n| n.depth).collect();
        assert_eq!(depths, vec![0, 1, 2]);
    }

    #[test]
    fn test_duration_sort_does_not_depend_on_clock() {
        let t0 = Utc::now();
        let mut finished = node(1, AgentStatus::Completed, Specialization::Testing);
        finished.start_time = t0;
        finished.end_time = Some(t0 + chrono::Duration::seconds(10));
        let mut running = node(1, AgentStatus::Running, Specialization::Backend);
        running.start_time = t0 + chrono::Duration::seconds(5);

        let mut first = vec![running.clone(), finished.clone()];
        SortKey::Duration.sort(&mut first);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut second = vec![running.clone(), finished.clone()];
        SortKey::Duration.sort(&mut second);

        assert_eq!(first, second);
        // Running is timed to the finished node's end: 5s against 10s
        assert_eq!(first[0].id, finished.id);
    }

    #[test]
    fn test_status_counts() {
        let nodes = vec![
            node(0, AgentStatus::Running, Specialization::General),
            node(1, AgentStatus::Completed, Specialization::Testing),
            node(1, AgentStatus::Failed, Specialization::Testing),
        ];
        let status = TreeStatus::from_nodes(nodes);
        assert_eq!(status.total_nodes, 3);
        assert_eq!(status.active_nodes, 1);
        assert_eq!(status.completed_nodes, 1);
        assert_eq!(status.failed_nodes, 1);
        assert_eq!(status.max_depth, 1);
        assert_eq!(status.total_cost, Usd::from_cents(1));
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!("startTime".parse::<SortKey>().unwrap(), SortKey::StartTime);
        assert_eq!("duration".parse::<SortKey>().unwrap(), SortKey::Duration);
        assert!("random".parse::<SortKey>().is_err());
    }
}
