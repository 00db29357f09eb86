//! Workflow graph scheduling — topological ordering and frontier computation.
//!
//! A workflow is a directed graph of audit procedure steps. The scheduler:
//! 1. Computes a deterministic execution order via Kahn's algorithm
//! 2. Groups mutually independent steps into parallel groups
//! 3. Detects cycles by omission (unresolved nodes are excluded, never an error)
//! 4. Computes the frontier of next-available steps from a completion set
//!
//! The graph is rebuilt from persisted node/edge lists on every scheduling
//! request and owns no state across calls.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A directed edge between two workflow steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Result of topologically ordering a workflow graph.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologicalOrder {
    /// All resolvable node ids, in execution order.
    pub order: Vec<String>,
    /// Execution order grouped into sets of mutually independent steps.
    pub parallel_groups: Vec<Vec<String>>,
    /// True when some nodes could not be ordered (cycle, or an edge into
    /// the node from a cyclic region). Those nodes are omitted from `order`.
    pub has_cycles: bool,
}

impl TopologicalOrder {
    /// Node ids that were declared but could not be ordered.
    pub fn omitted<'a>(&self, nodes: &'a [String]) -> Vec<&'a String> {
        let ordered: HashSet<&str> = self.order.iter().map(String::as_str).collect();
        nodes.iter().filter(|n| !ordered.contains(n.as_str())).collect()
    }
}

/// An in-memory view of one workflow's dependency graph.
///
/// Edges with dangling endpoints (either side not a declared node) are
/// dropped at construction — they can neither order nor block anything.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: Vec<String>,
    edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<String>, edges: Vec<Edge>) -> Self {
        let known: HashSet<&str> = nodes.iter().map(String::as_str).collect();
        let edges = edges
            .into_iter()
            .filter(|e| known.contains(e.source.as_str()) && known.contains(e.target.as_str()))
            .collect();
        Self { nodes, edges }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Kahn's algorithm with parallel-level grouping.
    ///
    /// Each round removes every currently-zero-in-degree node as one
    /// parallel group, preserving input relative order within the group so
    /// the result is deterministic for identical input. Nodes left with a
    /// positive in-degree after the sweep (cycles, including self-loops)
    /// are omitted and flagged via `has_cycles`.
    pub fn topological_order(&self) -> TopologicalOrder {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.as_str(), 0)).collect();
        let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();

        for edge in &self.edges {
            *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
            successors
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }

        let mut order: Vec<String> = Vec::with_capacity(self.nodes.len());
        let mut parallel_groups: Vec<Vec<String>> = Vec::new();
        let mut resolved: HashSet<&str> = HashSet::new();

        loop {
            // Input order scan keeps ties within a group input-stable.
            let group: Vec<&str> = self
                .nodes
                .iter()
                .map(String::as_str)
                .filter(|n| !resolved.contains(n) && in_degree[n] == 0)
                .collect();

            if group.is_empty() {
                break;
            }

            for node in &group {
                resolved.insert(node);
                if let Some(next) = successors.get(node) {
                    for target in next {
                        if let Some(d) = in_degree.get_mut(target) {
                            *d = d.saturating_sub(1);
                        }
                    }
                }
            }

            order.extend(group.iter().map(|n| n.to_string()));
            parallel_groups.push(group.iter().map(|n| n.to_string()).collect());
        }

        let has_cycles = order.len() < self.nodes.len();
        TopologicalOrder {
            order,
            parallel_groups,
            has_cycles,
        }
    }

    /// The frontier: steps whose upstream dependencies are all completed
    /// but which are not yet completed themselves.
    ///
    /// Recomputed from scratch on every call — completion state changes
    /// externally between calls, so nothing here may be cached.
    pub fn next_available_steps(
        &self,
        order: &[String],
        completed: &HashSet<String>,
    ) -> Vec<String> {
        order
            .iter()
            .filter(|node| !completed.contains(*node))
            .filter(|node| {
                self.edges
                    .iter()
                    .filter(|e| e.target == **node)
                    .all(|e| completed.contains(&e.source))
            })
            .cloned()
            .collect()
    }

    /// Convenience: order + frontier in one call, as the chat orchestrator
    /// and the `/order` endpoint both need them together.
    pub fn schedule(&self, completed: &HashSet<String>) -> (TopologicalOrder, Vec<String>) {
        let topo = self.topological_order();
        let frontier = self.next_available_steps(&topo.order, completed);
        (topo, frontier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> WorkflowGraph {
        WorkflowGraph::new(
            nodes.iter().map(|n| n.to_string()).collect(),
            edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect(),
        )
    }

    fn set(nodes: &[&str]) -> HashSet<String> {
        nodes.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_empty_graph() {
        let g = graph(&[], &[]);
        let topo = g.topological_order();
        assert!(topo.order.is_empty());
        assert!(topo.parallel_groups.is_empty());
        assert!(!topo.has_cycles);
    }

    #[test]
    fn test_diamond_order_and_groups() {
        let g = graph(
            &["A", "B", "C", "D"],
            &[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")],
        );
        let topo = g.topological_order();
        assert_eq!(topo.order, vec!["A", "B", "C", "D"]);
        assert_eq!(
            topo.parallel_groups,
            vec![vec!["A"], vec!["B", "C"], vec!["D"]]
        );
        assert!(!topo.has_cycles);
    }

    #[test]
    fn test_every_edge_respects_group_order() {
        let edges = [("A", "C"), ("B", "C"), ("C", "E"), ("D", "E")];
        let g = graph(&["A", "B", "C", "D", "E"], &edges);
        let topo = g.topological_order();
        assert_eq!(topo.order.len(), 5);

        let group_of = |node: &str| {
            topo.parallel_groups
                .iter()
                .position(|grp| grp.iter().any(|n| n == node))
                .unwrap()
        };
        for (s, t) in edges {
            assert!(group_of(s) < group_of(t), "{} must precede {}", s, t);
        }
    }

    #[test]
    fn test_cycle_nodes_omitted() {
        let g = graph(&["A", "B", "C", "D"], &[("A", "B"), ("B", "C"), ("C", "B"), ("C", "D")]);
        let topo = g.topological_order();
        assert!(topo.has_cycles);
        // B/C cycle and everything downstream of it drops out.
        assert_eq!(topo.order, vec!["A"]);
        let nodes: Vec<String> = ["A", "B", "C", "D"].iter().map(|n| n.to_string()).collect();
        let omitted: Vec<&str> = topo.omitted(&nodes).into_iter().map(String::as_str).collect();
        assert_eq!(omitted, vec!["B", "C", "D"]);
    }

    #[test]
    fn test_self_loop_flags_cycle_and_blocks_frontier() {
        let g = graph(&["X", "Y"], &[("X", "X")]);
        let topo = g.topological_order();
        assert!(topo.has_cycles);
        assert_eq!(topo.order, vec!["Y"]);

        // X never satisfies "all upstreams completed", even if somehow
        // marked completed-adjacent state exists for everything else.
        let frontier = g.next_available_steps(&["X".to_string(), "Y".to_string()], &set(&["Y"]));
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_dangling_edges_dropped() {
        let g = graph(&["A", "B"], &[("ghost", "B"), ("A", "missing")]);
        assert!(g.edges().is_empty());
        let topo = g.topological_order();
        assert_eq!(topo.order, vec!["A", "B"]);
        assert!(!topo.has_cycles);

        // A dangling source cannot block B's eligibility.
        let frontier = g.next_available_steps(&topo.order, &HashSet::new());
        assert_eq!(frontier, vec!["A", "B"]);
    }

    #[test]
    fn test_frontier_initially_zero_in_degree_nodes() {
        let g = graph(&["A", "B", "C"], &[("A", "B"), ("A", "C")]);
        let topo = g.topological_order();
        let frontier = g.next_available_steps(&topo.order, &HashSet::new());
        assert_eq!(frontier, vec!["A"]);
    }

    #[test]
    fn test_frontier_progression() {
        let g = graph(&["A", "B", "C"], &[("A", "B"), ("A", "C")]);
        let topo = g.topological_order();

        let frontier = g.next_available_steps(&topo.order, &set(&["A"]));
        assert_eq!(frontier, vec!["B", "C"]);

        let frontier = g.next_available_steps(&topo.order, &set(&["A", "B"]));
        assert_eq!(frontier, vec!["C"]);

        let frontier = g.next_available_steps(&topo.order, &set(&["A", "B", "C"]));
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_frontier_never_loses_eligible_nodes() {
        let g = graph(
            &["A", "B", "C", "D"],
            &[("A", "C"), ("B", "C"), ("C", "D")],
        );
        let topo = g.topological_order();
        let mut completed = HashSet::new();

        // Completing nodes one at a time in valid order: a node that was
        // eligible and not yet completed stays in the frontier.
        for step in ["A", "B", "C", "D"] {
            let frontier = g.next_available_steps(&topo.order, &completed);
            assert!(
                frontier.contains(&step.to_string()),
                "{} should be available before completion",
                step
            );
            completed.insert(step.to_string());
        }
        assert!(g.next_available_steps(&topo.order, &completed).is_empty());
    }
}
