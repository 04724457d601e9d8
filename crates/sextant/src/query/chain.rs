//! Bounded enumeration of simple paths between two components.
//!
//! The search is an iterative depth-first traversal with an explicit stack of
//! `(node, next neighbor)` cursors. The "visited" set only covers the path
//! currently under construction, so cycles cannot trap the search while a node
//! may still appear in several returned paths.
//!
//! Neighbors are explored in lexicographic id order. Combined with the stable
//! sort by depth at the end, the first `max_paths` paths found, and their
//! order, are the same on every run over an unchanged snapshot.
//!
//! A reverse breadth-first pass from the target first computes how far each
//! node is from it (up to `max_depth`). Branches that cannot reach the target
//! within the remaining depth are never entered, which keeps the search close
//! to O(V + E) on graphs where most of the frontier is irrelevant. Pruning only
//! skips branches that would yield nothing, so it does not change which paths
//! are found or in what order.

use std::collections::VecDeque;

use petgraph::graph::NodeIndex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{lookup, validate_depth, validate_max_paths};
use crate::config::ChainDefaults;
use crate::error::Result;
use crate::graph::GraphStore;
use crate::types::{EdgeKind, NodeKind};

/// Parameters of a `find_chain` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChainRequest {
    /// Component the paths start from.
    pub start: String,
    /// Component the paths end at. Omit to list direct neighbors of `start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Maximum path length in edges (1-20, default 10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    /// Maximum number of paths returned (default 100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_paths: Option<usize>,
}

impl ChainRequest {
    /// Request paths from `start` to `end` with default bounds.
    #[must_use]
    pub fn between(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: Some(end.into()),
            max_depth: None,
            max_paths: None,
        }
    }

    /// Request the direct neighbors of `start`.
    #[must_use]
    pub fn neighbors(start: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: None,
            max_depth: None,
            max_paths: None,
        }
    }

    /// Set the depth bound.
    #[must_use]
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Set the path cap.
    #[must_use]
    pub fn max_paths(mut self, max_paths: usize) -> Self {
        self.max_paths = Some(max_paths);
        self
    }
}

/// One path through the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Chain {
    /// Node ids from start to end.
    pub path: Vec<String>,
    /// Kind of each node in `path`.
    pub node_types: Vec<NodeKind>,
    /// Primary edge kind of each hop; one shorter than `path`.
    pub edge_types: Vec<EdgeKind>,
    /// Number of edges.
    pub depth: usize,
}

/// Answer to a `find_chain` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChainResult {
    /// Number of chains returned.
    pub total_chains: usize,
    /// Chains sorted by depth, then discovery order.
    pub chains: Vec<Chain>,
}

/// Finds paths in one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ChainFinder<'g> {
    graph: &'g GraphStore,
}

impl<'g> ChainFinder<'g> {
    /// Search `graph`.
    #[must_use]
    pub fn new(graph: &'g GraphStore) -> Self {
        Self { graph }
    }

    /// Answer a request, filling omitted bounds from `defaults`.
    ///
    /// # Errors
    ///
    /// See [`ChainFinder::find`].
    pub fn run(&self, request: &ChainRequest, defaults: ChainDefaults) -> Result<ChainResult> {
        self.find(
            &request.start,
            request.end.as_deref(),
            request.max_depth.unwrap_or(defaults.max_depth),
            request.max_paths.unwrap_or(defaults.max_paths),
        )
    }

    /// Enumerate up to `max_paths` simple paths from `start` to `end` of at
    /// most `max_depth` edges.
    ///
    /// Without `end`, returns one depth-1 chain per direct neighbor of
    /// `start` (sorted by id, capped by `max_paths`). With `start == end`,
    /// returns the single trivial path of depth 0.
    ///
    /// # Errors
    ///
    /// - `Validation` if `max_depth` is outside `1..=20` or `max_paths` is 0
    /// - `Graph` if the snapshot is empty
    /// - `NotFound` if `start` or `end` is not a node
    pub fn find(
        &self,
        start: &str,
        end: Option<&str>,
        max_depth: usize,
        max_paths: usize,
    ) -> Result<ChainResult> {
        let max_depth = validate_depth(max_depth)?;
        let max_paths = validate_max_paths(max_paths)?;
        let start = lookup(self.graph, start)?;
        let end = end.map(|id| lookup(self.graph, id)).transpose()?;

        let paths: Vec<Vec<NodeIndex>> = match end {
            None => self
                .graph
                .forward(start)
                .iter()
                .take(max_paths)
                .map(|(next, _)| vec![start, *next])
                .collect(),
            Some(end) if end == start => vec![vec![start]],
            Some(end) => self.search(start, end, max_depth, max_paths),
        };

        let mut chains: Vec<Chain> = paths.iter().map(|p| self.chain(p)).collect();
        chains.sort_by_key(|c| c.depth);
        debug!(
            start = %self.graph.node_at(start).id,
            chains = chains.len(),
            max_depth,
            max_paths,
            "Chain search finished"
        );
        Ok(ChainResult {
            total_chains: chains.len(),
            chains,
        })
    }

    fn search(
        &self,
        start: NodeIndex,
        end: NodeIndex,
        max_depth: usize,
        max_paths: usize,
    ) -> Vec<Vec<NodeIndex>> {
        let to_end = self.distances_to(end, max_depth);
        let mut found = Vec::new();
        if to_end[start.index()].is_none() {
            return found;
        }

        let mut on_path = vec![false; to_end.len()];
        let mut path = vec![start];
        let mut cursors = vec![0_usize];
        on_path[start.index()] = true;

        while let Some(&current) = path.last() {
            let slot = path.len() - 1;
            let Some(&(next, _)) = self.graph.forward(current).get(cursors[slot]) else {
                on_path[current.index()] = false;
                path.pop();
                cursors.pop();
                continue;
            };
            cursors[slot] += 1;

            if on_path[next.index()] {
                continue;
            }
            if next == end {
                let mut complete = path.clone();
                complete.push(end);
                found.push(complete);
                if found.len() >= max_paths {
                    break;
                }
                continue;
            }
            // `path.len()` edges are used once `next` is appended.
            let within_reach = to_end[next.index()].is_some_and(|d| path.len() + d <= max_depth);
            if within_reach {
                on_path[next.index()] = true;
                path.push(next);
                cursors.push(0);
            }
        }
        found
    }

    /// Reverse BFS distance of every node to `end`, up to `max_depth`.
    fn distances_to(&self, end: NodeIndex, max_depth: usize) -> Vec<Option<usize>> {
        let count = self.graph.stats().nodes;
        let mut distance = vec![None; count];
        let mut queue = VecDeque::from([end]);
        distance[end.index()] = Some(0);

        while let Some(current) = queue.pop_front() {
            let Some(d) = distance[current.index()] else {
                continue;
            };
            if d >= max_depth {
                continue;
            }
            for (prev, _) in self.graph.reverse(current) {
                if distance[prev.index()].is_none() {
                    distance[prev.index()] = Some(d + 1);
                    queue.push_back(*prev);
                }
            }
        }
        distance
    }

    fn chain(&self, path: &[NodeIndex]) -> Chain {
        let edge_types = path
            .windows(2)
            .map(|pair| {
                self.graph
                    .link_between(pair[0], pair[1])
                    .map_or(EdgeKind::References, |link| link.primary_kind())
            })
            .collect();
        Chain {
            path: path
                .iter()
                .map(|idx| self.graph.node_at(*idx).id.clone())
                .collect(),
            node_types: path.iter().map(|idx| self.graph.node_at(*idx).kind).collect(),
            edge_types,
            depth: path.len() - 1,
        }
    }
}
