use foreman::{Error, Graph, Parser};
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

#[test]
fn reference_procfile_parses_with_all_fields_preserved() {
    let manifest = Parser::new().load(fixture("procfile.yaml")).unwrap();
    assert_eq!(manifest.len(), 5);

    let redis6010 = manifest.get("redis6010").unwrap();
    assert_eq!(redis6010.cmd, "redis-server --port 6010");
    assert!(!redis6010.run_once);
    assert!(redis6010.deps.is_empty());
    assert_eq!(redis6010.checks.cmd, "redis-cli -p 6010 ping");
    assert_eq!(redis6010.checks.tcp_ports, vec![6010]);
    assert!(redis6010.checks.udp_ports.is_empty());

    let redis8080 = manifest.get("redis8080").unwrap();
    assert_eq!(redis8080.checks.tcp_ports, vec![8080]);
    assert_eq!(redis8080.checks.udp_ports, vec![80]);

    let app1 = manifest.get("app1").unwrap();
    assert_eq!(app1.cmd, "ping -c 1 google.com");
    assert!(app1.run_once);
    assert_eq!(app1.deps, vec!["redis6010".to_string()]);
    assert_eq!(app1.checks.cmd, "sleep 3");

    let app2 = manifest.get("app2").unwrap();
    assert!(!app2.run_once);
    assert_eq!(app2.deps, vec!["redis8080".to_string()]);

    let app3 = manifest.get("app3").unwrap();
    assert!(app3.run_once);
    assert_eq!(app3.deps, vec!["app1".to_string()]);
    assert!(app3.checks.cmd.is_empty());
}

#[test]
fn duplicate_service_names_both_line_numbers() {
    let err = Parser::new().load(fixture("procfile_dup.yaml")).unwrap_err();
    match &err {
        Error::DuplicateService {
            name,
            first_line,
            second_line,
        } => {
            assert_eq!(name, "app1");
            assert_eq!(*first_line, 1);
            assert_eq!(*second_line, 15);
        }
        other => panic!("expected DuplicateService, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn cycle_is_a_boot_error_with_sorted_witness() {
    // The manifest itself is well-formed; the cycle is a graph-level error.
    let manifest = Parser::new().load(fixture("procfile_cycle.yaml")).unwrap();
    let graph = Graph::build(&manifest);

    let witness = graph.find_cycle().expect("cycle expected");
    assert_eq!(witness, vec!["app1".to_string(), "redis6010".to_string()]);

    let err = graph.topo_sort().unwrap_err();
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn find_in_dir_walks_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("services/payments");
    std::fs::create_dir_all(&nested).unwrap();
    std::fs::write(dir.path().join("procfile.yaml"), "app:\n  cmd: sleep 1\n").unwrap();

    let found = Parser::find_in_dir(&nested).unwrap();
    assert_eq!(found, dir.path().join("procfile.yaml"));
}

#[test]
fn missing_procfile_is_a_manifest_error() {
    let err = Parser::new().load(fixture("does_not_exist.yaml")).unwrap_err();
    assert!(matches!(err, Error::Manifest(_)));
    assert_eq!(err.exit_code(), 1);
}
