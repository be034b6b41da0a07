//! End-to-end detection on small hand-built workloads

use crate::common::*;

#[test]
fn read_write_cycle_flags_rc_endpoints() {
    // T1 reads R twice, T2 writes R: two conflicts with distinct names
    // form a two-node cycle through one READ_WRITE edge each way round.
    let workload = analyze(&[
        ("T1", &[Op::Read("R"), Op::Read("R")]),
        ("T2", &[Op::Write("R")]),
    ]);

    assert!(rc_flag(&workload, "T1", 0));
    assert!(rc_flag(&workload, "T1", 1));
    assert!(rc_flag(&workload, "T2", 0));

    // no two consecutive READ_WRITE edges anywhere
    assert!(!si_flag(&workload, "T1", 0));
    assert!(!si_flag(&workload, "T2", 0));
    assert_eq!(workload.report().si_unsafe_cycles(workload.graph()), 0);
}

/// The plain two-template case, one read of R against one write of R.
///
/// The READ_WRITE edge and its WRITE_READ mirror carry the same conflict,
/// and a cycle needs distinct conflict names, so nothing is flagged here.
/// `read_write_cycle_flags_rc_endpoints` is the variant where the reader
/// touches R twice, which does form a cycle.
#[test]
fn single_conflict_is_not_a_cycle() {
    let workload = analyze(&[("T1", &[Op::Read("R")]), ("T2", &[Op::Write("R")])]);

    assert_eq!(workload.graph().edges().len(), 2);
    assert!(workload.report().cycles.is_empty());
    assert!(!rc_flag(&workload, "T1", 0));
    assert!(!rc_flag(&workload, "T2", 0));
}

#[test]
fn consecutive_read_writes_flag_second_edge_under_si() {
    // T1 -RW-> T2 -RW-> T3 -WR-> T1
    let workload = analyze(&[
        ("T1", &[Op::Read("a"), Op::Read("c")]),
        ("T2", &[Op::Write("a"), Op::Read("b")]),
        ("T3", &[Op::Write("b"), Op::Write("c")]),
    ]);
    let graph = workload.graph();
    let report = workload.report();

    assert_eq!(report.si_unsafe_cycles(graph), 1);

    // second READ_WRITE edge: T2 reads b, T3 writes b
    assert!(si_flag(&workload, "T2", 1));
    assert!(si_flag(&workload, "T3", 0));
    // nothing outside that edge
    assert!(!si_flag(&workload, "T1", 0));
    assert!(!si_flag(&workload, "T1", 1));
    assert!(!si_flag(&workload, "T2", 0));
    assert!(!si_flag(&workload, "T3", 1));

    // every READ_WRITE endpoint of every cycle is RC-flagged
    for (name, index) in [("T1", 0), ("T1", 1), ("T2", 0), ("T2", 1), ("T3", 0), ("T3", 1)] {
        assert!(rc_flag(&workload, name, index), "{} #{} not RC-flagged", name, index);
    }
}

#[test]
fn write_skew_flags_every_statement() {
    let workload = write_skew();
    for name in ["a", "b"] {
        for index in 0..2 {
            assert!(rc_flag(&workload, name, index));
            assert!(si_flag(&workload, name, index));
        }
    }
    assert_eq!(workload.relations().into_iter().collect::<Vec<_>>(), vec!["x", "y"]);
}

#[test]
fn scan_conflicts_like_read() {
    let workload = analyze(&[
        ("a", &[Op::Scan("x"), Op::Write("y")]),
        ("b", &[Op::Scan("y"), Op::Write("x")]),
    ]);
    assert!(si_flag(&workload, "a", 0));
    assert!(si_flag(&workload, "b", 0));
}

#[test]
fn skipped_statements_break_the_cycle() {
    let mut registry = TemplateRegistry::new();
    registry.register_transaction("a").unwrap();
    registry
        .register_statement("a", StatementSpec::read("x", "SELECT v FROM x WHERE id = ?").bind(0, "id"))
        .unwrap();
    registry
        .register_statement("a", StatementSpec::write("y", "UPDATE y SET v = ? WHERE id = ?").bind(1, "id"))
        .unwrap();
    registry.register_transaction("b").unwrap();
    registry
        .register_statement(
            "b",
            StatementSpec::read("y", "SELECT v FROM y WHERE id = ?").bind(0, "id").skip(),
        )
        .unwrap();
    registry
        .register_statement("b", StatementSpec::write("x", "UPDATE x SET v = ? WHERE id = ?").bind(1, "id"))
        .unwrap();
    let workload = registry.analyze().unwrap();

    assert!(workload.report().cycles.is_empty());
    for (name, index) in [("a", 0), ("a", 1), ("b", 0), ("b", 1)] {
        assert!(!workload.statement(name, index).unwrap().needs_validation());
    }
}

#[test]
fn read_only_workload_has_no_edges() {
    let workload = analyze(&[
        ("r1", &[Op::Read("x"), Op::Scan("y")]),
        ("r2", &[Op::Read("y"), Op::Read("x")]),
    ]);
    assert!(workload.graph().edges().is_empty());
    assert!(workload.report().rc_statements.is_empty());
}

#[test]
fn registration_errors_surface() {
    let mut registry = TemplateRegistry::new();
    registry.register_transaction("a").unwrap();
    assert!(matches!(
        registry.register_transaction("a"),
        Err(TailorError::Registration { .. })
    ));
    assert!(registry
        .register_statement("ghost", StatementSpec::read("x", "SELECT 1"))
        .is_err());
}
