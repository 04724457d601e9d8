//! Structural queries over a graph snapshot.
//!
//! | Query | Algorithm | Bound |
//! |-------|-----------|-------|
//! | [`ChainFinder`] | Depth-first search with backtracking over simple paths | `max_depth`, `max_paths` |
//! | [`ImpactAnalyzer`] | Breadth-first search, grouped by minimum distance | `max_depth` |
//!
//! Both borrow a [`GraphStore`](crate::graph::GraphStore) for their whole
//! run and never mutate it. Parameters are validated up front: out-of-range
//! values are rejected rather than clamped.

mod chain;
mod impact;

pub use chain::{Chain, ChainFinder, ChainRequest, ChainResult};
pub use impact::{Direction, ImpactAnalyzer, ImpactRequest, ImpactResult, LevelMap};

use petgraph::graph::NodeIndex;

use crate::config::MAX_DEPTH_CEILING;
use crate::error::{Error, Result};
use crate::graph::GraphStore;

/// Reject depths outside `1..=20`.
pub(crate) fn validate_depth(max_depth: usize) -> Result<usize> {
    if max_depth == 0 {
        return Err(Error::validation("max_depth", "must be at least 1"));
    }
    if max_depth > MAX_DEPTH_CEILING {
        return Err(Error::validation(
            "max_depth",
            format!("must be at most {MAX_DEPTH_CEILING}, got {max_depth}"),
        ));
    }
    Ok(max_depth)
}

/// Reject a zero path cap.
pub(crate) fn validate_max_paths(max_paths: usize) -> Result<usize> {
    if max_paths == 0 {
        return Err(Error::validation("max_paths", "must be at least 1"));
    }
    Ok(max_paths)
}

/// Resolve a node id, failing on an empty snapshot or an unknown id.
pub(crate) fn lookup(graph: &GraphStore, id: &str) -> Result<NodeIndex> {
    if graph.is_empty() {
        return Err(Error::Graph("the graph has no nodes; run an index first".to_string()));
    }
    graph
        .index_of(id)
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, false)]
    #[case::one(1, true)]
    #[case::ceiling(20, true)]
    #[case::above(21, false)]
    fn depth_bounds(#[case] depth: usize, #[case] ok: bool) {
        assert_eq!(validate_depth(depth).is_ok(), ok);
    }

    #[test]
    fn depth_error_is_validation_not_clamp() {
        let err = validate_depth(25).expect_err("too deep");
        assert!(matches!(err, Error::Validation { parameter: "max_depth", .. }));
    }

    #[test]
    fn empty_graph_is_a_graph_error() {
        let graph = GraphStore::build(std::iter::empty());
        assert!(matches!(lookup(&graph, "X"), Err(Error::Graph(_))));
    }
}
