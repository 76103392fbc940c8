use foreman::{Graph, Parser};
use std::path::PathBuf;

fn reference_graph() -> Graph {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/procfile.yaml");
    let manifest = Parser::new().load(path).unwrap();
    Graph::build(&manifest)
}

#[test]
fn toposort_orders_dependencies_before_dependents() {
    let order = reference_graph().topo_sort().unwrap();
    let pos = |name: &str| order.iter().position(|n| n == name).unwrap();

    assert!(pos("redis6010") < pos("app1"));
    assert!(pos("redis8080") < pos("app2"));
    assert!(pos("app1") < pos("app3"));
}

#[test]
fn toposort_is_a_permutation_of_the_manifest_keys() {
    let order = reference_graph().topo_sort().unwrap();
    assert_eq!(order.len(), 5);

    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(
        sorted,
        vec!["app1", "app2", "app3", "redis6010", "redis8080"]
    );
}

#[test]
fn toposort_is_stable_across_runs() {
    let first = reference_graph().topo_sort().unwrap();
    for _ in 0..10 {
        assert_eq!(reference_graph().topo_sort().unwrap(), first);
    }
}

#[test]
fn every_prefix_of_the_order_is_dependency_closed() {
    let graph = reference_graph();
    let order = graph.topo_sort().unwrap();

    let mut seen = std::collections::HashSet::new();
    for name in &order {
        for dep in graph.direct_deps(name) {
            assert!(
                seen.contains(dep),
                "{} was emitted before its dependency {}",
                name,
                dep
            );
        }
        seen.insert(name.clone());
    }
}
