//! Property tests for chain enumeration and impact levels on random graphs.

use std::collections::{BTreeSet, HashMap, VecDeque};

use proptest::prelude::*;
use sextant::{
    ChainFinder, ComponentKind, Direction, EdgeKind, FactRecord, Fingerprint, GraphStore,
    ImpactAnalyzer,
};

fn id(i: usize) -> String {
    format!("N{i}")
}

/// Node count and a directed edge set over `N0..N{n-1}`.
fn graph_strategy() -> impl Strategy<Value = (usize, BTreeSet<(usize, usize)>)> {
    (2_usize..8).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::btree_set((0..n, 0..n), 0..24),
        )
    })
}

fn build(n: usize, edges: &BTreeSet<(usize, usize)>) -> GraphStore {
    let records: Vec<FactRecord> = (0..n)
        .map(|i| {
            edges
                .iter()
                .filter(|(from, _)| *from == i)
                .fold(
                    FactRecord::new(
                        ComponentKind::Service,
                        id(i),
                        format!("src/{}.java", id(i)),
                        Fingerprint::new("p"),
                    ),
                    |record, (_, to)| {
                        record.with_reference(id(*to), Some(ComponentKind::Service), EdgeKind::Calls)
                    },
                )
        })
        .collect();
    GraphStore::build(records.iter())
}

/// Every simple path from `a` to `b` with at most `max_depth` edges, in
/// depth-first order with neighbors visited by ascending id.
fn brute_force_paths(
    edges: &BTreeSet<(usize, usize)>,
    a: usize,
    b: usize,
    max_depth: usize,
) -> Vec<Vec<String>> {
    fn walk(
        edges: &BTreeSet<(usize, usize)>,
        path: &mut Vec<usize>,
        b: usize,
        max_depth: usize,
        out: &mut Vec<Vec<String>>,
    ) {
        let Some(&last) = path.last() else { return };
        if last == b {
            out.push(path.iter().map(|&i| id(i)).collect());
            return;
        }
        if path.len() > max_depth {
            return;
        }
        for &(from, to) in edges {
            if from == last && !path.contains(&to) {
                path.push(to);
                walk(edges, path, b, max_depth, out);
                path.pop();
            }
        }
    }

    let mut out = Vec::new();
    walk(edges, &mut vec![a], b, max_depth, &mut out);
    out
}

/// Shortest distance from `start` following `edges` backwards.
fn reverse_distances(edges: &BTreeSet<(usize, usize)>, start: usize) -> HashMap<usize, usize> {
    let mut dist = HashMap::from([(start, 0)]);
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        let d = dist[&current];
        for &(from, to) in edges {
            if to == current && !dist.contains_key(&from) {
                dist.insert(from, d + 1);
                queue.push_back(from);
            }
        }
    }
    dist
}

proptest! {
    #[test]
    fn chains_are_simple_bounded_real_paths(
        (n, edges) in graph_strategy(),
        a in 0_usize..8,
        b in 0_usize..8,
        max_depth in 1_usize..6,
    ) {
        let (a, b) = (a % n, b % n);
        prop_assume!(a != b);
        let (start, end) = (id(a), id(b));
        let graph = build(n, &edges);
        let result = ChainFinder::new(&graph)
            .find(&start, Some(&end), max_depth, 10_000)
            .expect("find");

        prop_assert_eq!(result.total_chains, result.chains.len());
        for chain in &result.chains {
            let unique: BTreeSet<_> = chain.path.iter().collect();
            prop_assert_eq!(unique.len(), chain.path.len());
            prop_assert_eq!(chain.depth, chain.path.len() - 1);
            prop_assert!(chain.depth <= max_depth);
            prop_assert_eq!(chain.edge_types.len(), chain.depth);
            prop_assert_eq!(chain.path.first(), Some(&start));
            prop_assert_eq!(chain.path.last(), Some(&end));
            for hop in chain.path.windows(2) {
                prop_assert!(graph.link(&hop[0], &hop[1]).is_some());
            }
        }
        prop_assert!(result.chains.windows(2).all(|w| w[0].depth <= w[1].depth));

        let found: BTreeSet<Vec<String>> =
            result.chains.iter().map(|c| c.path.clone()).collect();
        let expected: BTreeSet<Vec<String>> =
            brute_force_paths(&edges, a, b, max_depth).into_iter().collect();
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn capped_chains_are_the_first_found_in_discovery_order(
        (n, edges) in graph_strategy(),
        a in 0_usize..8,
        b in 0_usize..8,
        cap in 1_usize..4,
    ) {
        let (a, b) = (a % n, b % n);
        prop_assume!(a != b);
        let graph = build(n, &edges);
        let finder = ChainFinder::new(&graph);

        let capped = finder.find(&id(a), Some(&id(b)), 10, cap).expect("capped");
        let again = finder.find(&id(a), Some(&id(b)), 10, cap).expect("again");
        let all = finder.find(&id(a), Some(&id(b)), 10, 10_000).expect("all");

        prop_assert_eq!(&capped, &again);
        prop_assert_eq!(capped.total_chains, cap.min(all.total_chains));

        // First `cap` paths found depth-first, then ordered by depth with ties
        // kept in discovery order.
        let mut expected = brute_force_paths(&edges, a, b, 10);
        expected.truncate(cap);
        expected.sort_by_key(Vec::len);
        let returned: Vec<Vec<String>> =
            capped.chains.iter().map(|c| c.path.clone()).collect();
        prop_assert_eq!(returned, expected);
    }

    #[test]
    fn upstream_levels_are_shortest_distances(
        (n, edges) in graph_strategy(),
        target in 0_usize..8,
        max_depth in 1_usize..6,
    ) {
        let target = target % n;
        let graph = build(n, &edges);
        let impact = ImpactAnalyzer::new(&graph)
            .analyze(&id(target), Direction::Upstream, max_depth)
            .expect("impact");
        let levels = impact.upstream.expect("upstream requested");

        let expected: HashMap<String, usize> = reverse_distances(&edges, target)
            .into_iter()
            .filter(|&(node, d)| node != target && d <= max_depth)
            .map(|(node, d)| (id(node), d))
            .collect();

        prop_assert_eq!(levels.total(), expected.len());
        prop_assert_eq!(impact.total_upstream, expected.len());
        for (node, distance) in &expected {
            prop_assert_eq!(levels.level_of(node), Some(*distance));
        }
    }
}
