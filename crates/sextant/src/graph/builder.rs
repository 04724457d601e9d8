//! Projection of fact records into a [`GraphStore`].
//!
//! The build is a pure function of the record list: the same records in the
//! same order always produce the same snapshot.
//!
//! ## Resolution
//!
//! 1. **Claims.** Each record claims the node named after it. When several
//!    records claim one id with different kinds or attributes, the record
//!    with more populated attributes wins and ties keep the first claimant.
//!    Every such conflict is recorded as a [`BuildWarning`].
//! 2. **Placeholders.** A referenced name nobody claims becomes an
//!    unresolved node of the first hinted kind, or `External` without a hint.
//!    Once a record for that name is analyzed, the next build fills the node
//!    in under the same id.
//! 3. **Edges.** References from every claimant contribute edges, including
//!    the losers of a conflict. Parallel references between one node pair
//!    merge into a single link carrying the union of their kinds.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use tracing::{debug, warn};

use super::{BuildWarning, GraphEdge, GraphNode, GraphStore, Link, NodeState};
use crate::types::{FactRecord, NodeKind};

/// The record a node is built from.
struct Claim<'a> {
    winner: &'a FactRecord,
    populated: usize,
}

impl GraphStore {
    /// Build a snapshot from fact records.
    pub fn build<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a FactRecord>,
    {
        let records: Vec<&FactRecord> = records.into_iter().collect();
        let mut warnings = Vec::new();

        let claims = resolve_claims(&records, &mut warnings);
        let placeholders = resolve_placeholders(&records, &claims, &mut warnings);

        // Id order doubles as NodeIndex order.
        let mut ids: BTreeMap<&str, Option<&Claim<'_>>> = BTreeMap::new();
        for (id, claim) in &claims {
            ids.insert(*id, Some(claim));
        }
        for id in placeholders.keys() {
            ids.entry(*id).or_insert(None);
        }

        let mut graph: DiGraph<GraphNode, Link> =
            DiGraph::with_capacity(ids.len(), records.len() * 2);
        let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(ids.len());
        for (id, claim) in ids {
            let node = match claim {
                Some(claim) => GraphNode {
                    id: id.to_string(),
                    kind: claim.winner.kind.into(),
                    attributes: claim.winner.attributes.clone(),
                    state: NodeState::Analyzed {
                        source_path: claim.winner.source_path.clone(),
                    },
                },
                None => GraphNode {
                    id: id.to_string(),
                    kind: placeholders
                        .get(id)
                        .copied()
                        .flatten()
                        .unwrap_or(NodeKind::External),
                    attributes: crate::types::Attributes::new(),
                    state: NodeState::Unresolved,
                },
            };
            index.insert(id, graph.add_node(node));
        }

        let mut pairs: HashMap<(NodeIndex, NodeIndex), EdgeIndex> = HashMap::new();
        let mut edges = Vec::new();
        for record in &records {
            let Some(&from) = index.get(record.name.trim()) else {
                continue;
            };
            for reference in &record.references {
                let target = reference.target_name.trim();
                let Some(&to) = index.get(target) else {
                    // Only blank targets are missing from the index.
                    warnings.push(BuildWarning::EmptyReference {
                        from: record.name.trim().to_string(),
                        source_path: record.source_path.clone(),
                    });
                    continue;
                };

                match pairs.entry((from, to)) {
                    Entry::Occupied(existing) => {
                        let link = &mut graph[*existing.get()];
                        link.kinds.insert(reference.edge_kind);
                        link.evidence.insert(record.source_path.clone());
                    }
                    Entry::Vacant(slot) => {
                        let link = Link {
                            kinds: BTreeSet::from([reference.edge_kind]),
                            evidence: BTreeSet::from([record.source_path.clone()]),
                        };
                        slot.insert(graph.add_edge(from, to, link));
                    }
                }
                edges.push(GraphEdge {
                    from: record.name.trim().to_string(),
                    to: target.to_string(),
                    kind: reference.edge_kind,
                    evidence: record.source_path.clone(),
                });
            }
        }
        edges.sort_unstable();
        edges.dedup();

        for warning in &warnings {
            warn!(%warning, "Graph build warning");
        }

        let store = Self::assemble(graph, edges, warnings);
        let stats = store.stats();
        debug!(
            records = records.len(),
            nodes = stats.nodes,
            unresolved = stats.unresolved,
            links = stats.links,
            cycles = stats.cycles,
            "Built graph snapshot"
        );
        store
    }
}

fn resolve_claims<'a>(
    records: &[&'a FactRecord],
    warnings: &mut Vec<BuildWarning>,
) -> BTreeMap<&'a str, Claim<'a>> {
    let mut claims: BTreeMap<&str, Claim<'_>> = BTreeMap::new();
    for &record in records {
        let id = record.name.trim();
        if id.is_empty() {
            continue;
        }
        let populated = record.populated_attribute_count();
        let Some(current) = claims.get_mut(id) else {
            claims.insert(id, Claim { winner: record, populated });
            continue;
        };

        let same_kind = current.winner.kind == record.kind;
        if same_kind && current.winner.attributes == record.attributes {
            continue;
        }
        let difference = if same_kind { "attributes differ" } else { "kinds differ" };

        let (kept, discarded, reason) = if populated > current.populated {
            let reason = format!(
                "{difference}; {populated} populated attributes beat {}",
                current.populated
            );
            let discarded = std::mem::replace(current, Claim { winner: record, populated });
            (record.source_path.clone(), discarded.winner.source_path.clone(), reason)
        } else {
            let reason = if populated == current.populated {
                format!("{difference}; tie on {populated} populated attributes keeps first")
            } else {
                format!(
                    "{difference}; {} populated attributes beat {populated}",
                    current.populated
                )
            };
            (current.winner.source_path.clone(), record.source_path.clone(), reason)
        };
        warnings.push(BuildWarning::ConflictingNode {
            id: id.to_string(),
            kept,
            discarded,
            reason,
        });
    }
    claims
}

/// Unclaimed reference targets and the kind hint each placeholder takes.
fn resolve_placeholders<'a>(
    records: &[&'a FactRecord],
    claims: &BTreeMap<&str, Claim<'_>>,
    warnings: &mut Vec<BuildWarning>,
) -> BTreeMap<&'a str, Option<NodeKind>> {
    let mut placeholders: BTreeMap<&str, Option<NodeKind>> = BTreeMap::new();
    for &record in records {
        for reference in &record.references {
            let target = reference.target_name.trim();
            if target.is_empty() || claims.contains_key(target) {
                continue;
            }
            let hint = reference.target_kind_hint.map(NodeKind::from);
            let placeholder = placeholders.entry(target).or_insert(None);
            match (*placeholder, hint) {
                (None, Some(_)) => *placeholder = hint,
                (Some(kept), Some(ignored)) if kept != ignored => {
                    warnings.push(BuildWarning::PlaceholderKindMismatch {
                        id: target.to_string(),
                        kept,
                        ignored,
                        referenced_by: record.source_path.clone(),
                    });
                }
                _ => {}
            }
        }
    }
    placeholders
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComponentKind, EdgeKind, Fingerprint};
    use std::path::PathBuf;
    use serde_json::json;

    fn record(kind: ComponentKind, name: &str, path: &str) -> FactRecord {
        FactRecord::new(kind, name, path, Fingerprint::new("f"))
    }

    #[test]
    fn richer_record_wins_conflict() {
        let sparse = record(ComponentKind::Service, "UserService", "a/UserService.java");
        let rich = record(ComponentKind::Service, "UserService", "b/UserService.java")
            .with_attribute("package", json!("com.acme"));

        let graph = GraphStore::build([&sparse, &rich]);

        let node = graph.node("UserService").expect("node");
        assert_eq!(
            node.state,
            NodeState::Analyzed {
                source_path: PathBuf::from("b/UserService.java")
            }
        );
        assert!(matches!(
            &graph.warnings()[..],
            [BuildWarning::ConflictingNode { kept, discarded, .. }]
                if kept == &PathBuf::from("b/UserService.java")
                    && discarded == &PathBuf::from("a/UserService.java")
        ));
    }

    #[test]
    fn tie_keeps_first_claimant_and_warns() {
        let first = record(ComponentKind::Mapper, "UserMapper", "UserMapper.java");
        let second = record(ComponentKind::Table, "UserMapper", "user_mapper.sql");

        let graph = GraphStore::build([&first, &second]);

        assert_eq!(graph.node("UserMapper").map(|n| n.kind), Some(NodeKind::Mapper));
        assert_eq!(graph.warnings().len(), 1);
        assert!(graph.warnings()[0].to_string().contains("tie"));
    }

    #[test]
    fn identical_claims_are_not_conflicts() {
        let a = record(ComponentKind::View, "user/list", "list.jsp");
        let b = record(ComponentKind::View, "user/list", "list_copy.jsp");

        let graph = GraphStore::build([&a, &b]);

        assert!(graph.warnings().is_empty());
        assert_eq!(graph.stats().nodes, 1);
    }

    #[test]
    fn losing_claimant_still_contributes_edges() {
        let winner = record(ComponentKind::Service, "UserService", "a.java")
            .with_attribute("package", json!("com.acme"))
            .with_reference("UserMapper", None, EdgeKind::Calls);
        let loser = record(ComponentKind::Service, "UserService", "b.java")
            .with_reference("AuditMapper", None, EdgeKind::Calls);

        let graph = GraphStore::build([&winner, &loser]);

        assert_eq!(graph.successors("UserService"), vec!["AuditMapper", "UserMapper"]);
    }

    #[test]
    fn placeholder_takes_first_hint_and_reports_mismatch() {
        let a = record(ComponentKind::Mapper, "UserMapper", "UserMapper.xml").with_reference(
            "users",
            Some(ComponentKind::Table),
            EdgeKind::MapsTo,
        );
        let b = record(ComponentKind::Procedure, "sync_users", "sync.sql").with_reference(
            "users",
            Some(ComponentKind::View),
            EdgeKind::Queries,
        );
        let c = record(ComponentKind::Service, "UserService", "UserService.java")
            .with_reference("users", None, EdgeKind::References);

        let graph = GraphStore::build([&a, &b, &c]);

        assert_eq!(graph.node("users").map(|n| n.kind), Some(NodeKind::Table));
        assert!(matches!(
            &graph.warnings()[..],
            [BuildWarning::PlaceholderKindMismatch { kept: NodeKind::Table, ignored: NodeKind::View, .. }]
        ));
    }

    #[test]
    fn analyzed_record_fills_placeholder_under_same_id() {
        let controller = record(ComponentKind::Controller, "UserController", "c.java")
            .with_reference("UserService", Some(ComponentKind::Service), EdgeKind::Calls);
        let before = GraphStore::build([&controller]);
        assert!(before.node("UserService").is_some_and(GraphNode::is_unresolved));

        let service = record(ComponentKind::Service, "UserService", "s.java")
            .with_attribute("transactional", json!(true));
        let after = GraphStore::build([&controller, &service]);

        let node = after.node("UserService").expect("node");
        assert!(!node.is_unresolved());
        assert_eq!(node.attributes.len(), 1);
        assert_eq!(after.successors("UserController"), vec!["UserService"]);
    }

    #[test]
    fn blank_reference_targets_are_skipped_with_warning() {
        let mut raw = record(ComponentKind::View, "user/list", "list.jsp");
        raw.references
            .push(crate::types::Reference::new("  ", None, EdgeKind::Includes));

        let graph = GraphStore::build([&raw]);

        assert_eq!(graph.stats().nodes, 1);
        assert!(matches!(&graph.warnings()[..], [BuildWarning::EmptyReference { .. }]));
    }

    #[test]
    fn build_is_deterministic() {
        let records = [
            record(ComponentKind::Controller, "B", "b").with_reference("C", None, EdgeKind::Calls),
            record(ComponentKind::Controller, "A", "a").with_reference("C", None, EdgeKind::Calls),
        ];
        let first = GraphStore::build(&records);
        let second = GraphStore::build(&records);

        assert_eq!(first.edges(), second.edges());
        assert_eq!(first.predecessors("C"), vec!["A", "B"]);
    }
}
