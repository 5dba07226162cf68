//! End-to-end tests for `noderefs` multi-hop traversal.
//!
//! Tests pivot directions, hop bounds, omit rules, join, unique and edge
//! traversal. Each test exercises: parse -> runtime -> pipeline against
//! MemoryStorage.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use hyperq::{Buid, Graph, MemoryStorage, Model, ModelDef, Ndef, Node, QueryOpts, Snap, Value};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

// ============================================================================
// Helper: a small DNS graph.
//
//   inet:ipv4=1 <-ipv4- inet:dns:a=woot.com/1 -fqdn-> inet:fqdn=woot.com
//   inet:ipv4=2 <-ipv4- inet:dns:a=woot.com/2 -fqdn-> inet:fqdn=woot.com
// ============================================================================

fn dns_model() -> Model {
    Model::from_def(
        ModelDef::new()
            .form("inet:ipv4", [])
            .form("inet:fqdn", [])
            .form("inet:dns:a", [("fqdn", "inet:fqdn"), ("ipv4", "inet:ipv4")])
            .edge("refs", []),
    )
    .unwrap()
}

struct Dns {
    graph: Graph<MemoryStorage>,
    ip1: Node,
    ip2: Node,
    fqdn: Node,
    dns1: Node,
    dns2: Node,
}

fn setup_dns() -> Dns {
    let graph = Graph::open_memory(dns_model());
    let db = graph.storage();

    let ip1 = db.add_node("inet:ipv4", Value::from(1)).unwrap();
    let ip2 = db.add_node("inet:ipv4", Value::from(2)).unwrap();
    let fqdn = db.add_node("inet:fqdn", Value::from("woot.com")).unwrap();
    let dns1 = db
        .add_node_with("inet:dns:a", "woot.com/1", [
            ("fqdn", Value::from("woot.com")),
            ("ipv4", Value::from(1)),
        ])
        .unwrap();
    let dns2 = db
        .add_node_with("inet:dns:a", "woot.com/2", [
            ("fqdn", Value::from("woot.com")),
            ("ipv4", Value::from(2)),
        ])
        .unwrap();

    Dns { graph, ip1, ip2, fqdn, dns1, dns2 }
}

fn from(nodes: &[&Node]) -> QueryOpts {
    QueryOpts {
        ndefs: nodes.iter().map(|n| n.ndef()).collect(),
        ..Default::default()
    }
}

fn buid_set(nodes: &[&Node]) -> BTreeSet<Buid> {
    nodes.iter().map(|n| n.buid).collect()
}

fn run(graph: &Graph<MemoryStorage>, query: &str, opts: QueryOpts) -> Vec<Buid> {
    graph.execute(query, opts).unwrap().buids()
}

// ============================================================================
// 1. One hop from an ipv4 reaches only the dns:a that references it
// ============================================================================

#[test]
fn test_one_degree_from_ipv4() {
    let d = setup_dns();
    let got = run(&d.graph, "noderefs", from(&[&d.ip1]));
    assert_eq!(got, vec![d.dns1.buid]);
}

#[test]
fn test_join_yields_source_first() {
    let d = setup_dns();
    let got = run(&d.graph, "noderefs --join", from(&[&d.ip1]));
    assert_eq!(got, vec![d.ip1.buid, d.dns1.buid]);
}

// ============================================================================
// 2. Hop bounds
// ============================================================================

#[test]
fn test_degrees_bound_the_walk() {
    let d = setup_dns();

    let two: BTreeSet<Buid> = run(&d.graph, "noderefs -d 2", from(&[&d.ip1])).into_iter().collect();
    assert_eq!(two, buid_set(&[&d.dns1, &d.fqdn]));

    let four: BTreeSet<Buid> = run(&d.graph, "noderefs -d 4", from(&[&d.ip1])).into_iter().collect();
    assert_eq!(four, buid_set(&[&d.dns1, &d.fqdn, &d.dns2, &d.ip2]));
}

#[test]
fn test_argv_forms_for_degrees() {
    let d = setup_dns();
    let want = buid_set(&[&d.dns1, &d.fqdn]);
    for query in ["noderefs -d2", "noderefs --deg 2", "noderefs --degrees=2"] {
        let got: BTreeSet<Buid> = run(&d.graph, query, from(&[&d.ip1])).into_iter().collect();
        assert_eq!(got, want, "{query}");
    }
}

#[test]
fn test_uniq_keeps_path_of_first_source() {
    let d = setup_dns();
    let result = d.graph.execute("noderefs -d 2 | uniq", from(&[&d.ip1, &d.ip2])).unwrap();

    let fqdns: Vec<_> = result.nodes.iter().filter(|(node, _)| node.buid == d.fqdn.buid).collect();
    assert_eq!(fqdns.len(), 1);

    let hops: Vec<Buid> = fqdns[0].1.nodes().iter().map(|n| n.buid).collect();
    assert_eq!(hops, vec![d.ip1.buid, d.dns1.buid, d.fqdn.buid]);
    assert_eq!(result.nodes.len(), 3);
}

#[test]
fn test_path_length_matches_hops() {
    let d = setup_dns();
    let result = d.graph.execute("noderefs -d 4", from(&[&d.ip1])).unwrap();

    let hops: BTreeMap<Buid, usize> = result
        .nodes
        .iter()
        .map(|(node, path)| (node.buid, path.len() - 1))
        .collect();
    assert_eq!(hops[&d.dns1.buid], 1);
    assert_eq!(hops[&d.fqdn.buid], 2);
    assert_eq!(hops[&d.dns2.buid], 3);
    assert_eq!(hops[&d.ip2.buid], 4);

    for (node, path) in &result.nodes {
        assert_eq!(path.start().buid, d.ip1.buid);
        assert_eq!(path.end().buid, node.buid);
    }
}

#[test]
fn test_zero_degrees_is_bad_oper_arg() {
    let d = setup_dns();
    let err = d.graph.execute("noderefs -d 0", from(&[&d.ip1])).unwrap_err();
    assert!(matches!(err, hyperq::Error::BadOperArg { .. }), "got {err:?}");
}

#[test]
fn test_zero_degrees_fails_even_without_input() {
    let d = setup_dns();
    let result = d.graph.execute("noderefs -d 0 | count", QueryOpts::default());
    // The check runs on the first pull, which still happens with no input.
    assert!(matches!(result, Err(hyperq::Error::BadOperArg { .. })));
}

// ============================================================================
// 3. Omit rules
// ============================================================================

#[test]
fn test_omit_form_excludes_and_blocks() {
    let d = setup_dns();
    let got = run(&d.graph, "noderefs -d 3 --omit-form inet:dns:a", from(&[&d.ip1]));
    assert!(got.is_empty(), "got {got:?}");
}

#[test]
fn test_omit_traversal_form_yields_but_stops() {
    let d = setup_dns();
    let got = run(&d.graph, "noderefs -d 3 -otf inet:dns:a", from(&[&d.ip1]));
    assert_eq!(got, vec![d.dns1.buid]);
}

#[test]
fn test_omit_tag_excludes_and_blocks() {
    let d = setup_dns();
    d.graph.storage().add_tag(&d.dns1.buid, "omit.nopiv", Value::Null).unwrap();

    let got = run(&d.graph, "noderefs -d 3 -ot omit.nopiv", from(&[&d.ip1]));
    assert!(got.is_empty(), "got {got:?}");

    // Ancestors are applied too, so the parent tag matches as well.
    let got = run(&d.graph, "noderefs -d 3 -ot omit", from(&[&d.ip1]));
    assert!(got.is_empty(), "got {got:?}");
}

#[test]
fn test_omit_traversal_tag_yields_but_stops() {
    let d = setup_dns();
    d.graph.storage().add_tag(&d.dns1.buid, "omit.nopiv", Value::Null).unwrap();

    let got = run(&d.graph, "noderefs -d 3 --omit-traversal-tag #omit.nopiv", from(&[&d.ip1]));
    assert_eq!(got, vec![d.dns1.buid]);
}

// ============================================================================
// 4. Visited scope
// ============================================================================

#[test]
fn test_visited_resets_per_source() {
    let d = setup_dns();
    let got = run(&d.graph, "noderefs -d 2", from(&[&d.ip1, &d.ip2]));
    let fqdns = got.iter().filter(|b| **b == d.fqdn.buid).count();
    assert_eq!(fqdns, 2);
}

#[test]
fn test_unique_shares_visited_across_sources() {
    let d = setup_dns();
    let got = run(&d.graph, "noderefs -d 2 --unique", from(&[&d.ip1, &d.ip2]));
    let fqdns = got.iter().filter(|b| **b == d.fqdn.buid).count();
    assert_eq!(fqdns, 1);

    let set: BTreeSet<Buid> = got.iter().copied().collect();
    assert_eq!(set.len(), got.len());
}

#[test]
fn test_source_never_yielded_by_its_own_walk() {
    let d = setup_dns();
    let got = run(&d.graph, "noderefs -d 4", from(&[&d.ip1]));
    assert!(!got.contains(&d.ip1.buid));
}

// ============================================================================
// 5. Edges
// ============================================================================

#[test]
fn test_traverse_edge() {
    let d = setup_dns();
    let db = d.graph.storage();
    let edge = db
        .add_node_with("refs", "ip1->ip2", [
            ("n1", Value::from(d.ip1.ndef())),
            ("n2", Value::from(d.ip2.ndef())),
        ])
        .unwrap();

    let plain: BTreeSet<Buid> = run(&d.graph, "noderefs", from(&[&d.ip1])).into_iter().collect();
    assert_eq!(plain, buid_set(&[&d.dns1, &edge]));

    let across: BTreeSet<Buid> = run(&d.graph, "noderefs -te", from(&[&d.ip1])).into_iter().collect();
    assert_eq!(across, buid_set(&[&d.dns1, &d.ip2]));
}

#[test]
fn test_dangling_edge_endpoint_is_skipped() {
    let d = setup_dns();
    let db = d.graph.storage();
    db.add_node_with("refs", "ip1->ghost", [
        ("n1", Value::from(d.ip1.ndef())),
        ("n2", Value::from(Ndef::new("inet:ipv4", 99))),
    ])
    .unwrap();

    let got = run(&d.graph, "noderefs -te", from(&[&d.ip1]));
    assert_eq!(got, vec![d.dns1.buid]);
}

// ============================================================================
// 6. Properties over random link graphs
// ============================================================================

fn link_model() -> Model {
    Model::from_def(
        ModelDef::new()
            .form("test:ip", [])
            .form("test:link", [("a", "test:ip"), ("b", "test:ip")]),
    )
    .unwrap()
}

/// `nodes` ips and one link node per `(a, b)` pair.
fn link_graph(nodes: i64, links: &[(i64, i64)]) -> (Graph<MemoryStorage>, Vec<Node>) {
    let graph = Graph::open_memory(link_model());
    let db = graph.storage();
    let ips: Vec<Node> = (0..nodes).map(|i| db.add_node("test:ip", Value::from(i)).unwrap()).collect();
    for (i, (a, b)) in links.iter().enumerate() {
        db.add_node_with("test:link", format!("l{i}"), [("a", Value::from(*a)), ("b", Value::from(*b))])
            .unwrap();
    }
    (graph, ips)
}

/// Hop distance of every node reachable from `src`, found independently of
/// the engine.
fn distances(db: &MemoryStorage, src: &Node) -> BTreeMap<Buid, usize> {
    let links: Vec<Node> = db
        .nodes_by(&hyperq::Selector::form("test:link"), None, hyperq::Cmpr::Eq)
        .collect();
    let ip = |v: &Value| db.node_by_ndef(&Ndef::new("test:ip", v.clone())).map(|n| n.buid);

    let mut adj: BTreeMap<Buid, BTreeSet<Buid>> = BTreeMap::new();
    for link in &links {
        for end in ["a", "b"] {
            if let Some(b) = link.get(end).and_then(ip) {
                adj.entry(link.buid).or_default().insert(b);
                adj.entry(b).or_default().insert(link.buid);
            }
        }
    }

    let mut dist = BTreeMap::from([(src.buid, 0)]);
    let mut queue = VecDeque::from([src.buid]);
    while let Some(cur) = queue.pop_front() {
        let next = dist[&cur] + 1;
        for n in adj.get(&cur).into_iter().flatten() {
            if !dist.contains_key(n) {
                dist.insert(*n, next);
                queue.push_back(*n);
            }
        }
    }
    dist.remove(&src.buid);
    dist
}

fn links_strategy() -> impl Strategy<Value = (i64, Vec<(i64, i64)>)> {
    (2i64..8).prop_flat_map(|n| (Just(n), prop::collection::vec((0..n, 0..n), 0..12)))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn noderefs_matches_bounded_bfs((n, links) in links_strategy(), degrees in 1i64..6) {
        let (graph, ips) = link_graph(n, &links);
        let result = graph
            .execute(&format!("noderefs -d {degrees}"), from(&[&ips[0]]))
            .unwrap();

        let want: BTreeMap<Buid, usize> = distances(graph.storage(), &ips[0])
            .into_iter()
            .filter(|(_, d)| (*d as i64) <= degrees)
            .collect();
        let got: BTreeMap<Buid, usize> = result
            .nodes
            .iter()
            .map(|(node, path)| (node.buid, path.len() - 1))
            .collect();

        prop_assert_eq!(got.len(), result.nodes.len(), "a node was yielded twice");
        prop_assert_eq!(got, want);
    }

    #[test]
    fn noderefs_degree_output_grows((n, links) in links_strategy(), degrees in 1i64..5) {
        let (graph, ips) = link_graph(n, &links);
        let opts = from(&[&ips[0]]);

        let small: BTreeSet<Buid> = run(&graph, &format!("noderefs -d {degrees}"), opts.clone())
            .into_iter()
            .collect();
        let large: BTreeSet<Buid> = run(&graph, &format!("noderefs -d {}", degrees + 1), opts)
            .into_iter()
            .collect();

        prop_assert!(small.is_subset(&large));
    }
}
