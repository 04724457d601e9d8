//! Immutable dependency graph snapshot.
//!
//! A [`GraphStore`] is built once from a set of fact records (see
//! [`builder`]) and never mutated afterwards. Queries hold an
//! `Arc<GraphStore>` for their whole run; a rebuild produces a new snapshot
//! that replaces the old one for subsequent queries.
//!
//! ## Layout
//!
//! | Structure | Purpose |
//! |-----------|---------|
//! | `DiGraph<GraphNode, Link>` | One logical link per ordered node pair |
//! | `index` | Node id to `NodeIndex` |
//! | `links` | `(from, to)` to link, O(1) edge lookup |
//! | `forward` / `reverse` | Neighbor lists per node, sorted by neighbor id |
//! | `edges` | The raw multigraph: one entry per emitted reference kind and evidence file |
//!
//! Nodes are inserted in lexicographic id order, so `NodeIndex` order and id
//! order coincide. Sorting neighbor lists by index is therefore the same as
//! sorting them by id.

pub mod builder;
pub mod cycles;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use serde::Serialize;

use crate::types::{Attributes, EdgeKind, NodeKind};
pub use cycles::Cycle;

/// Whether a node was backed by an analyzed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeState {
    /// Produced from a fact record.
    Analyzed {
        /// File the winning record came from.
        source_path: PathBuf,
    },
    /// Only referenced; no record claims this id.
    Unresolved,
}

/// A component in the graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    /// Component name.
    pub id: String,
    /// Component kind, or `External` for placeholders without a hint.
    pub kind: NodeKind,
    /// Attributes of the winning record; empty for placeholders.
    pub attributes: Attributes,
    /// Analyzed or placeholder.
    #[serde(flatten)]
    pub state: NodeState,
}

impl GraphNode {
    /// Whether this node is a placeholder.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.state == NodeState::Unresolved
    }
}

/// The logical connection between an ordered node pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    /// Union of all edge kinds emitted for this pair.
    pub kinds: BTreeSet<EdgeKind>,
    /// Files whose records emitted the pair, sorted.
    pub evidence: BTreeSet<PathBuf>,
}

impl Link {
    /// The kind reported when one label is needed: the smallest in the union.
    #[must_use]
    pub fn primary_kind(&self) -> EdgeKind {
        self.kinds
            .first()
            .copied()
            .unwrap_or(EdgeKind::References)
    }
}

/// One emitted reference, as stored in the multigraph view.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct GraphEdge {
    /// Referencing node id.
    pub from: String,
    /// Referenced node id.
    pub to: String,
    /// Relationship.
    pub kind: EdgeKind,
    /// File whose record emitted the reference.
    pub evidence: PathBuf,
}

/// Something the builder resolved by policy rather than by the data alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum BuildWarning {
    /// Two records claimed one id with different kinds or attributes.
    ConflictingNode {
        /// The contested id.
        id: String,
        /// Record whose kind and attributes the node carries.
        kept: PathBuf,
        /// Record that lost.
        discarded: PathBuf,
        /// Why `kept` won.
        reason: String,
    },
    /// References hinted different kinds for the same placeholder.
    PlaceholderKindMismatch {
        /// The placeholder id.
        id: String,
        /// Kind the placeholder was given.
        kept: NodeKind,
        /// Hint that was ignored.
        ignored: NodeKind,
        /// File whose record carried the ignored hint.
        referenced_by: PathBuf,
    },
    /// A reference with a blank target name was skipped.
    EmptyReference {
        /// Referencing node id.
        from: String,
        /// File whose record carried the reference.
        source_path: PathBuf,
    },
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConflictingNode {
                id,
                kept,
                discarded,
                reason,
            } => write!(
                f,
                "node '{id}' claimed by {} and {}; kept {} ({reason})",
                kept.display(),
                discarded.display(),
                kept.display()
            ),
            Self::PlaceholderKindMismatch {
                id,
                kept,
                ignored,
                referenced_by,
            } => write!(
                f,
                "unresolved node '{id}' is {kept}, ignoring {ignored} hint from {}",
                referenced_by.display()
            ),
            Self::EmptyReference { from, source_path } => write!(
                f,
                "skipped reference with empty target from '{from}' in {}",
                source_path.display()
            ),
        }
    }
}

/// Size of a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    /// All nodes, placeholders included.
    pub nodes: usize,
    /// Placeholder nodes.
    pub unresolved: usize,
    /// Logical links (distinct ordered node pairs).
    pub links: usize,
    /// Raw multigraph edges.
    pub edges: usize,
    /// Distinct cycles.
    pub cycles: usize,
    /// Builder warnings.
    pub warnings: usize,
}

/// An immutable graph snapshot.
#[derive(Debug)]
pub struct GraphStore {
    graph: DiGraph<GraphNode, Link>,
    index: HashMap<String, NodeIndex>,
    links: HashMap<(NodeIndex, NodeIndex), EdgeIndex>,
    forward: Vec<Vec<(NodeIndex, EdgeIndex)>>,
    reverse: Vec<Vec<(NodeIndex, EdgeIndex)>>,
    edges: Vec<GraphEdge>,
    warnings: Vec<BuildWarning>,
    cycles: Vec<Cycle>,
    built_at: DateTime<Utc>,
}

impl GraphStore {
    /// Assemble a snapshot from a graph whose nodes were added in id order.
    pub(crate) fn assemble(
        graph: DiGraph<GraphNode, Link>,
        edges: Vec<GraphEdge>,
        warnings: Vec<BuildWarning>,
    ) -> Self {
        let index = graph
            .node_indices()
            .map(|idx| (graph[idx].id.clone(), idx))
            .collect();

        let mut links = HashMap::with_capacity(graph.edge_count());
        let mut forward = vec![Vec::new(); graph.node_count()];
        let mut reverse = vec![Vec::new(); graph.node_count()];
        for edge in graph.edge_indices() {
            if let Some((from, to)) = graph.edge_endpoints(edge) {
                links.insert((from, to), edge);
                forward[from.index()].push((to, edge));
                reverse[to.index()].push((from, edge));
            }
        }
        for list in forward.iter_mut().chain(reverse.iter_mut()) {
            list.sort_unstable_by_key(|(neighbor, _)| *neighbor);
        }

        let cycles = cycles::detect(&graph);

        Self {
            graph,
            index,
            links,
            forward,
            reverse,
            edges,
            warnings,
            cycles,
            built_at: Utc::now(),
        }
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|idx| &self.graph[*idx])
    }

    /// Whether a node with this id exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// The link from `from` to `to`, if one exists.
    #[must_use]
    pub fn link(&self, from: &str, to: &str) -> Option<&Link> {
        let from = *self.index.get(from)?;
        let to = *self.index.get(to)?;
        self.link_between(from, to)
    }

    /// Ids of the nodes `id` points to, sorted.
    #[must_use]
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.index_of(id)
            .map(|idx| self.ids(self.forward(idx)))
            .unwrap_or_default()
    }

    /// Ids of the nodes pointing to `id`, sorted.
    #[must_use]
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.index_of(id)
            .map(|idx| self.ids(self.reverse(idx)))
            .unwrap_or_default()
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    /// The raw multigraph edges, sorted by `(from, to, kind, evidence)`.
    #[must_use]
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Warnings recorded while building this snapshot.
    #[must_use]
    pub fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }

    /// Cycles found when this snapshot was built.
    #[must_use]
    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    /// When this snapshot was built.
    #[must_use]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Whether the snapshot has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Counts describing this snapshot.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.graph.node_count(),
            unresolved: self.nodes().filter(|n| n.is_unresolved()).count(),
            links: self.graph.edge_count(),
            edges: self.edges.len(),
            cycles: self.cycles.len(),
            warnings: self.warnings.len(),
        }
    }

    pub(crate) fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub(crate) fn node_at(&self, idx: NodeIndex) -> &GraphNode {
        &self.graph[idx]
    }

    pub(crate) fn link_between(&self, from: NodeIndex, to: NodeIndex) -> Option<&Link> {
        self.links.get(&(from, to)).map(|edge| &self.graph[*edge])
    }

    pub(crate) fn forward(&self, idx: NodeIndex) -> &[(NodeIndex, EdgeIndex)] {
        self.forward.get(idx.index()).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn reverse(&self, idx: NodeIndex) -> &[(NodeIndex, EdgeIndex)] {
        self.reverse.get(idx.index()).map_or(&[], Vec::as_slice)
    }

    fn ids(&self, neighbors: &[(NodeIndex, EdgeIndex)]) -> Vec<&str> {
        neighbors
            .iter()
            .map(|(idx, _)| self.graph[*idx].id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComponentKind, FactRecord, Fingerprint};

    fn record(kind: ComponentKind, name: &str) -> FactRecord {
        FactRecord::new(kind, name, format!("src/{name}"), Fingerprint::new("f"))
    }

    fn sample() -> GraphStore {
        let records = [
            record(ComponentKind::Controller, "UserController")
                .with_reference("UserService", None, EdgeKind::Calls)
                .with_reference("AuditService", None, EdgeKind::Calls)
                .with_reference("user/list", Some(ComponentKind::View), EdgeKind::Renders),
            record(ComponentKind::Service, "UserService")
                .with_reference("UserMapper", Some(ComponentKind::Mapper), EdgeKind::Calls)
                .with_reference("UserMapper", Some(ComponentKind::Mapper), EdgeKind::References),
        ];
        GraphStore::build(&records)
    }

    #[test]
    fn neighbor_lists_are_sorted_by_id() {
        let graph = sample();

        assert_eq!(
            graph.successors("UserController"),
            vec!["AuditService", "UserService", "user/list"]
        );
        assert_eq!(graph.predecessors("UserMapper"), vec!["UserService"]);
        assert!(graph.successors("missing").is_empty());
    }

    #[test]
    fn parallel_references_merge_into_one_link() {
        let graph = sample();

        let link = graph.link("UserService", "UserMapper").expect("link exists");
        assert_eq!(link.kinds.len(), 2);
        assert_eq!(link.primary_kind(), EdgeKind::Calls);
        assert!(graph.link("UserMapper", "UserService").is_none());

        let stats = graph.stats();
        assert_eq!(stats.links, 4);
        assert_eq!(stats.edges, 5);
    }

    #[test]
    fn unresolved_nodes_are_materialized() {
        let graph = sample();

        let mapper = graph.node("UserMapper").expect("placeholder");
        assert!(mapper.is_unresolved());
        assert_eq!(mapper.kind, NodeKind::Mapper);
        assert_eq!(graph.node("AuditService").map(|n| n.kind), Some(NodeKind::External));
        assert_eq!(graph.stats().unresolved, 3);
    }

    #[test]
    fn every_edge_endpoint_exists() {
        let graph = sample();
        for edge in graph.edges() {
            assert!(graph.contains(&edge.from), "{}", edge.from);
            assert!(graph.contains(&edge.to), "{}", edge.to);
        }
    }

    #[test]
    fn node_serializes_with_state_tag() {
        let graph = sample();
        let json = serde_json::to_value(graph.node("UserController").expect("node")).expect("json");

        assert_eq!(json["state"], "analyzed");
        assert_eq!(json["source_path"], "src/UserController");
        assert_eq!(json["kind"], "controller");
    }
}
