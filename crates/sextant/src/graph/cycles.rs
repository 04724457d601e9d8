//! Circular dependency detection.
//!
//! Runs once per snapshot build using Tarjan's strongly connected components.
//! Each component with more than one node, or a single node linking to
//! itself, is one cycle identified by its sorted node set.
//!
//! A reported cycle is a circular dependency group, not one elementary loop:
//! `A <-> B` plus `B <-> C` is reported as the single group `{A, B, C}`.

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use serde::Serialize;

use super::{GraphNode, Link};

/// A circular dependency group: a maximal set of nodes that can all reach
/// each other.
///
/// Overlapping loops merge into one group, so the nodes need not lie on a
/// single loop together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Cycle {
    /// Node ids, sorted.
    pub nodes: Vec<String>,
}

impl Cycle {
    /// Number of nodes in the cycle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cycle has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `id` takes part in this cycle.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.binary_search_by(|n| n.as_str().cmp(id)).is_ok()
    }
}

/// Find every circular dependency group, sorted by node set.
pub(crate) fn detect(graph: &DiGraph<GraphNode, Link>) -> Vec<Cycle> {
    let mut cycles: Vec<Cycle> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| match scc.as_slice() {
            [single] => graph.contains_edge(*single, *single),
            nodes => nodes.len() > 1,
        })
        .map(|scc| {
            let mut nodes: Vec<String> = scc.iter().map(|idx| graph[*idx].id.clone()).collect();
            nodes.sort();
            Cycle { nodes }
        })
        .collect();

    cycles.sort();
    cycles.dedup();
    cycles
}
