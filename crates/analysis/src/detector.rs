//! Dangerous-structure detection
//!
//! Enumerates induced cycles of the dependency graph and derives which
//! statement templates need runtime validation under each protocol.
//!
//! ## Cycle enumeration
//!
//! Depth-first search from every node keeps the current path and its
//! edges. An edge back to a node on the path closes a candidate cycle,
//! accepted only when the closing edge's name is not already used by the
//! cycle (an edge and its mirror are one conflict). Cycles longer than two
//! must also be chordless: no edge outside the cycle's own conflicts may
//! join two non-consecutive members. Cycles are deduplicated by rotation.
//!
//! ## Classification
//!
//! | Structure | Flag | Statements flagged |
//! |-----------|------|--------------------|
//! | ≥ 1 READ_WRITE edge | RC | both endpoints of every READ_WRITE edge |
//! | two consecutive READ_WRITE edges (cyclically) | SI | both endpoints of the second edge |
//!
//! Detection is a pure function of the graph; applying a report to a set
//! of templates only ever sets flags, so repeated runs are idempotent.

use crate::graph::{DependencyEdge, DependencyGraph, EdgeKind};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use tailor_core::{
    StatementRef, TailorError, TailorResult, TemplateId, TransactionTemplate, ValidationProtocol,
};
use tracing::{debug, info};

/// A closed walk of dependency edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Nodes in walk order; `nodes[i]` is the source of `edges[i]`
    nodes: Vec<TemplateId>,
    /// Edge indices into the graph, in walk order
    edges: Vec<usize>,
}

impl Cycle {
    /// Nodes in walk order
    pub fn nodes(&self) -> &[TemplateId] {
        &self.nodes
    }

    /// Edge indices in walk order
    pub fn edge_indices(&self) -> &[usize] {
        &self.edges
    }

    /// Number of nodes (and edges)
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Always false for a detected cycle
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Edges resolved against the graph, in walk order
    pub fn edges<'g>(&'g self, graph: &'g DependencyGraph) -> impl Iterator<Item = &'g DependencyEdge> + 'g {
        self.edges.iter().map(move |&idx| graph.edge(idx))
    }

    /// Cycle contains at least one READ_WRITE edge
    pub fn is_rc_unsafe(&self, graph: &DependencyGraph) -> bool {
        self.edges(graph).any(|e| e.kind == EdgeKind::ReadWrite)
    }

    /// Cycle contains two consecutive READ_WRITE edges
    pub fn is_si_unsafe(&self, graph: &DependencyGraph) -> bool {
        !self.consecutive_read_writes(graph).is_empty()
    }

    /// Positions `k` such that `edges[k-1]` and `edges[k]` are both READ_WRITE
    ///
    /// Adjacency is cyclic: position 0 pairs with the last edge.
    fn consecutive_read_writes(&self, graph: &DependencyGraph) -> Vec<usize> {
        let n = self.edges.len();
        let is_rw = |pos: usize| graph.edge(self.edges[pos]).kind == EdgeKind::ReadWrite;
        (0..n)
            .filter(|&k| is_rw((k + n - 1) % n) && is_rw(k))
            .collect()
    }

    /// Rotation starting at the smallest edge index, used for deduplication
    fn canonical(&self) -> Vec<usize> {
        let start = self
            .edges
            .iter()
            .enumerate()
            .min_by_key(|(_, &e)| e)
            .map(|(pos, _)| pos)
            .unwrap_or(0);
        let mut rotated = Vec::with_capacity(self.edges.len());
        rotated.extend_from_slice(&self.edges[start..]);
        rotated.extend_from_slice(&self.edges[..start]);
        rotated
    }
}

/// Outcome of dangerous-structure detection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionReport {
    /// Every accepted induced cycle
    pub cycles: Vec<Cycle>,
    /// Statements that need validation under RC_TAILOR
    pub rc_statements: BTreeSet<StatementRef>,
    /// Statements that need validation under SI_TAILOR
    pub si_statements: BTreeSet<StatementRef>,
}

impl DetectionReport {
    /// Number of cycles containing a READ_WRITE edge
    pub fn rc_unsafe_cycles(&self, graph: &DependencyGraph) -> usize {
        self.cycles.iter().filter(|c| c.is_rc_unsafe(graph)).count()
    }

    /// Number of cycles containing two consecutive READ_WRITE edges
    pub fn si_unsafe_cycles(&self, graph: &DependencyGraph) -> usize {
        self.cycles.iter().filter(|c| c.is_si_unsafe(graph)).count()
    }

    /// Set the validation flags on the reported statements
    ///
    /// # Errors
    ///
    /// Returns `Internal` if a reported statement does not exist in
    /// `templates`.
    pub fn apply(&self, templates: &mut [TransactionTemplate]) -> TailorResult<()> {
        let flags = self
            .rc_statements
            .iter()
            .map(|s| (s, ValidationProtocol::RcTailor))
            .chain(self.si_statements.iter().map(|s| (s, ValidationProtocol::SiTailor)));

        for (stmt, protocol) in flags {
            let template = templates
                .get_mut(stmt.template.0 as usize)
                .ok_or_else(|| TailorError::internal(format!("unknown template {}", stmt.template)))?;
            template
                .statement_mut(stmt.index)
                .ok_or_else(|| {
                    TailorError::internal(format!(
                        "template {} has no statement {}",
                        stmt.template, stmt.index
                    ))
                })?
                .mark_validation(protocol);
        }
        Ok(())
    }
}

/// Enumerate all accepted induced cycles of `graph`
pub fn find_cycles(graph: &DependencyGraph) -> Vec<Cycle> {
    let mut search = CycleSearch::new(graph);
    for start in 0..graph.node_count() {
        search.start = start;
        search.visit(start);
    }
    search.cycles
}

/// Run detection over a graph
pub fn detect(graph: &DependencyGraph) -> DetectionReport {
    let cycles = find_cycles(graph);
    let mut report = DetectionReport::default();

    for cycle in &cycles {
        debug!(
            target: "tailor::analysis",
            nodes = ?cycle.nodes(),
            kinds = %cycle.edges(graph).map(|e| e.kind.to_string()).collect::<Vec<_>>().join("->"),
            "Cycle accepted"
        );

        for edge in cycle.edges(graph).filter(|e| e.kind == EdgeKind::ReadWrite) {
            report.rc_statements.insert(edge.from_statement());
            report.rc_statements.insert(edge.to_statement());
        }

        for k in cycle.consecutive_read_writes(graph) {
            let second = graph.edge(cycle.edges[k]);
            report.si_statements.insert(second.from_statement());
            report.si_statements.insert(second.to_statement());
        }
    }
    report.cycles = cycles;

    info!(
        target: "tailor::analysis",
        edges = graph.edges().len(),
        cycles = report.cycles.len(),
        rc_unsafe = report.rc_unsafe_cycles(graph),
        si_unsafe = report.si_unsafe_cycles(graph),
        rc_statements = report.rc_statements.len(),
        si_statements = report.si_statements.len(),
        "Dangerous-structure detection complete"
    );

    report
}

/// Depth-first cycle enumeration state
///
/// Only nodes numbered at or above `start` are entered, so each cycle is
/// found from its smallest node; `seen` removes rotations found through
/// different back edges.
struct CycleSearch<'g> {
    graph: &'g DependencyGraph,
    start: usize,
    path_nodes: Vec<usize>,
    path_edges: Vec<usize>,
    on_path: Vec<bool>,
    seen: FxHashSet<Vec<usize>>,
    cycles: Vec<Cycle>,
}

impl<'g> CycleSearch<'g> {
    fn new(graph: &'g DependencyGraph) -> Self {
        CycleSearch {
            graph,
            start: 0,
            path_nodes: Vec::new(),
            path_edges: Vec::new(),
            on_path: vec![false; graph.node_count()],
            seen: FxHashSet::default(),
            cycles: Vec::new(),
        }
    }

    fn visit(&mut self, node: usize) {
        let graph = self.graph;
        self.path_nodes.push(node);
        self.on_path[node] = true;

        for &edge_idx in graph.outgoing(TemplateId(node as u32)) {
            let next = graph.edge(edge_idx).to.0 as usize;
            if next < self.start {
                continue;
            }
            if self.on_path[next] {
                self.close_cycle(next, edge_idx);
            } else {
                self.path_edges.push(edge_idx);
                self.visit(next);
                self.path_edges.pop();
            }
        }

        self.on_path[node] = false;
        self.path_nodes.pop();
    }

    fn close_cycle(&mut self, target: usize, closing_edge: usize) {
        let Some(pos) = self.path_nodes.iter().position(|&n| n == target) else {
            return;
        };

        let graph = self.graph;
        let closing_name = &graph.edge(closing_edge).name;
        if self.path_edges[pos..]
            .iter()
            .any(|&e| &graph.edge(e).name == closing_name)
        {
            return;
        }

        let mut edges = self.path_edges[pos..].to_vec();
        edges.push(closing_edge);
        let cycle = Cycle {
            nodes: self.path_nodes[pos..]
                .iter()
                .map(|&n| TemplateId(n as u32))
                .collect(),
            edges,
        };

        if cycle.len() > 2 && has_chord(graph, &cycle) {
            return;
        }
        if self.seen.insert(cycle.canonical()) {
            self.cycles.push(cycle);
        }
    }
}

/// True if an edge outside the cycle's conflicts joins two non-consecutive members
fn has_chord(graph: &DependencyGraph, cycle: &Cycle) -> bool {
    let names: FxHashSet<&str> = cycle.edges(graph).map(|e| e.name.as_str()).collect();
    let n = cycle.nodes.len();

    for i in 0..n {
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            let (a, b) = (cycle.nodes[i], cycle.nodes[j]);
            if graph
                .edges_between(a, b)
                .any(|e| !names.contains(e.name.as_str()))
            {
                return true;
            }
        }
    }
    false
}
