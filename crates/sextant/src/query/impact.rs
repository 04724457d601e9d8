//! Leveled reachability (blast radius).
//!
//! Upstream impact walks the reverse adjacency lists (who depends on this
//! node), downstream impact walks the forward lists (what this node depends
//! on). Both are breadth-first, so every node is reported once, at its
//! minimum distance from the target.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use petgraph::graph::{EdgeIndex, NodeIndex};
use schemars::JsonSchema;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use super::{lookup, validate_depth};
use crate::config::ImpactDefaults;
use crate::error::Result;
use crate::graph::GraphStore;

/// Which way to traverse from the target node.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Components that depend on the target.
    Upstream,
    /// Components the target depends on.
    Downstream,
    /// Both, reported separately.
    #[default]
    Both,
}

impl Direction {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Downstream => "downstream",
            Self::Both => "both",
        }
    }

    fn includes_upstream(self) -> bool {
        matches!(self, Self::Upstream | Self::Both)
    }

    fn includes_downstream(self) -> bool {
        matches!(self, Self::Downstream | Self::Both)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upstream" | "up" => Ok(Self::Upstream),
            "downstream" | "down" => Ok(Self::Downstream),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "unknown direction '{other}' (expected upstream, downstream or both)"
            )),
        }
    }
}

/// Parameters of an `impact` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImpactRequest {
    /// Component whose impact is analyzed.
    pub node: String,
    /// Traversal direction (default both).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// Maximum distance (1-20, default 5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
}

impl ImpactRequest {
    /// Request impact of `node` with default parameters.
    #[must_use]
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            direction: None,
            max_depth: None,
        }
    }

    /// Set the direction.
    #[must_use]
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Set the depth bound.
    #[must_use]
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }
}

/// Node ids grouped by distance. Serializes as `{"level_1": [...], ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelMap(BTreeMap<usize, Vec<String>>);

impl LevelMap {
    /// Ids at distance `level`, sorted.
    #[must_use]
    pub fn level(&self, level: usize) -> &[String] {
        self.0.get(&level).map_or(&[], Vec::as_slice)
    }

    /// Non-empty levels in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.0.iter().map(|(level, ids)| (*level, ids.as_slice()))
    }

    /// Total number of ids across all levels.
    #[must_use]
    pub fn total(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Distance of `id`, if it was reached.
    #[must_use]
    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.0
            .iter()
            .find(|(_, ids)| ids.binary_search_by(|n| n.as_str().cmp(id)).is_ok())
            .map(|(level, _)| *level)
    }

    /// Whether nothing was reached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for LevelMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (level, ids) in &self.0 {
            map.serialize_entry(&format!("level_{level}"), ids)?;
        }
        map.end()
    }
}

#[allow(clippy::ref_option)] // signature fixed by `serialize_with`
fn levels_or_empty<S: Serializer>(
    levels: &Option<LevelMap>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match levels {
        Some(levels) => levels.serialize(serializer),
        None => LevelMap::default().serialize(serializer),
    }
}

/// Answer to an `impact` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ImpactResult {
    /// The analyzed component.
    pub target_node: String,
    /// Dependents by distance; `None` for downstream-only requests, which
    /// serialize it as `{}`.
    #[serde(serialize_with = "levels_or_empty")]
    #[schemars(with = "BTreeMap<String, Vec<String>>")]
    pub upstream: Option<LevelMap>,
    /// Dependencies by distance; `None` for upstream-only requests, which
    /// serialize it as `{}`.
    #[serde(serialize_with = "levels_or_empty")]
    #[schemars(with = "BTreeMap<String, Vec<String>>")]
    pub downstream: Option<LevelMap>,
    /// Number of upstream components.
    pub total_upstream: usize,
    /// Number of downstream components.
    pub total_downstream: usize,
}

/// Computes impact in one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ImpactAnalyzer<'g> {
    graph: &'g GraphStore,
}

impl<'g> ImpactAnalyzer<'g> {
    /// Analyze `graph`.
    #[must_use]
    pub fn new(graph: &'g GraphStore) -> Self {
        Self { graph }
    }

    /// Answer a request, filling omitted parameters from `defaults`.
    ///
    /// # Errors
    ///
    /// See [`ImpactAnalyzer::analyze`].
    pub fn run(&self, request: &ImpactRequest, defaults: ImpactDefaults) -> Result<ImpactResult> {
        self.analyze(
            &request.node,
            request.direction.unwrap_or_default(),
            request.max_depth.unwrap_or(defaults.max_depth),
        )
    }

    /// Group everything within `max_depth` hops of `node` by distance.
    ///
    /// # Errors
    ///
    /// - `Validation` if `max_depth` is outside `1..=20`
    /// - `Graph` if the snapshot is empty
    /// - `NotFound` if `node` does not exist
    pub fn analyze(&self, node: &str, direction: Direction, max_depth: usize) -> Result<ImpactResult> {
        let max_depth = validate_depth(max_depth)?;
        let target = lookup(self.graph, node)?;

        let graph = self.graph;
        let upstream = direction
            .includes_upstream()
            .then(|| self.levels(target, max_depth, |idx| graph.reverse(idx)));
        let downstream = direction
            .includes_downstream()
            .then(|| self.levels(target, max_depth, |idx| graph.forward(idx)));

        let result = ImpactResult {
            target_node: self.graph.node_at(target).id.clone(),
            total_upstream: upstream.as_ref().map_or(0, LevelMap::total),
            total_downstream: downstream.as_ref().map_or(0, LevelMap::total),
            upstream,
            downstream,
        };
        debug!(
            node = %result.target_node,
            %direction,
            max_depth,
            upstream = result.total_upstream,
            downstream = result.total_downstream,
            "Impact analysis finished"
        );
        Ok(result)
    }

    fn levels<'a, F>(&self, target: NodeIndex, max_depth: usize, neighbors: F) -> LevelMap
    where
        F: Fn(NodeIndex) -> &'a [(NodeIndex, EdgeIndex)],
    {
        let mut seen = vec![false; self.graph.stats().nodes];
        let mut queue = VecDeque::from([(target, 0_usize)]);
        let mut levels: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        seen[target.index()] = true;

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for (next, _) in neighbors(current) {
                if seen[next.index()] {
                    continue;
                }
                seen[next.index()] = true;
                levels
                    .entry(depth + 1)
                    .or_default()
                    .push(self.graph.node_at(*next).id.clone());
                queue.push_back((*next, depth + 1));
            }
        }

        for ids in levels.values_mut() {
            ids.sort();
        }
        LevelMap(levels)
    }
}
