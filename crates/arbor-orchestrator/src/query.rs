//! Read-side views of the node registry: ordered walks, status, rendering

use std::collections::HashMap;

use arbor_core::{AgentId, AgentNode, StatusQuery, TreeStatus};

/// Nodes in pre-order: each parent before its children, children in spawn order
pub fn preorder(nodes: &HashMap<AgentId, AgentNode>, root: &AgentId) -> Vec<AgentNode> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut stack = vec![*root];
    while let Some(id) = stack.pop() {
        if let Some(node) = nodes.get(&id) {
            out.push(node.clone());
            stack.extend(node.children.iter().rev().copied());
        }
    }
    out
}

/// Filter and sort a pre-order listing into a status snapshot
///
/// `total_cost` is the root's cost regardless of the filter.
pub fn tree_status(
    ordered: Vec<AgentNode>,
    query: &StatusQuery,
    root_cost: arbor_core::Usd,
) -> TreeStatus {
    let mut listed: Vec<AgentNode> = ordered
        .into_iter()
        .filter(|n| query.filter.matches(n))
        .collect();
    query.sort.sort(&mut listed);
    let mut status = TreeStatus::from_nodes(listed);
    status.total_cost = root_cost;
    status
}

/// Indented rendering, one line per node
pub fn render_tree(ordered: &[AgentNode]) -> String {
    let mut out = String::new();
    for node in ordered {
        out.push_str(&"  ".repeat(node.depth as usize));
        out.push_str(&format!(
            "{} [{}] {} {} branch={} cost={}/{}",
            node.id.short(),
            node.specialization,
            node.phase,
            node.status,
            node.branch,
            node.cost_so_far,
            node.budget_ceiling
        ));
        if let Some(reason) = &node.stop_reason {
            out.push_str(&format!(" ({})", reason));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{AgentStatus, Phase, SortKey, Specialization, StatusFilter, Usd};
    use chrono::Utc;
    use std::path::PathBuf;

    fn node(id: AgentId, parent: Option<AgentId>, depth: u32, spec: Specialization) -> AgentNode {
        AgentNode {
            id,
            parent_id: parent,
            depth,
            vision: "v".into(),
            working_directory: PathBuf::from("."),
            specialization: spec,
            phase: Phase::Explore,
            status: AgentStatus::Running,
            branch: format!("b{}", depth),
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

    /// root -> (a -> a1), b
    fn sample() -> (HashMap<AgentId, AgentNode>, AgentId, [AgentId; 3]) {
        let root = AgentId::new();
        let a = AgentId::new();
        let a1 = AgentId::new();
        let b = AgentId::new();
        let mut nodes = HashMap::new();
        let mut r = node(root, None, 0, Specialization::General);
        r.children = vec![a, b];
        let mut na = node(a, Some(root), 1, Specialization::Backend);
        na.children = vec![a1];
        nodes.insert(root, r);
        nodes.insert(a, na);
        nodes.insert(a1, node(a1, Some(a), 2, Specialization::Testing));
        nodes.insert(b, node(b, Some(root), 1, Specialization::Frontend));
        (nodes, root, [a, a1, b])
    }

    #[test]
    fn test_preorder_follows_spawn_order() {
        let (nodes, root, [a, a1, b]) = sample();
        let ids: Vec<AgentId> = preorder(&nodes, &root).iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![root, a, a1, b]);
    }

    #[test]
    fn test_status_filter_keeps_root_cost() {
        let (nodes, root, _) = sample();
        let query = StatusQuery {
            filter: StatusFilter {
                min_depth: Some(1),
                ..Default::default()
            },
            sort: SortKey::Depth,
        };
        let status = tree_status(preorder(&nodes, &root), &query, Usd::from_cents(7));
        assert_eq!(status.total_nodes, 3);
        assert_eq!(status.max_depth, 2);
        assert_eq!(status.tree.last().unwrap().depth, 2);
        assert_eq!(status.total_cost, Usd::from_cents(7));
    }

    #[test]
    fn test_render_indents_by_depth() {
        let (nodes, root, _) = sample();
        let text = render_tree(&preorder(&nodes, &root));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(!lines[0].starts_with(' '));
        assert!(lines[2].starts_with("    "));
        assert!(lines[1].contains("[backend] EXPLORE running"));
    }
}
