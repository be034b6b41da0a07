//! Static dependency graph over transaction templates
//!
//! Nodes are transaction templates; edges are conflicts between one
//! statement of each template on the same relation. The graph is a
//! multigraph: two templates are usually connected by several edges, one
//! per conflicting statement pair and direction.
//!
//! ## Edge construction
//!
//! For every unordered pair of distinct templates `(T1, T2)` and every
//! non-skipped statement pair `(s1 ∈ T1, s2 ∈ T2)` on the same relation:
//!
//! | s1 | s2 | edges |
//! |----|----|-------|
//! | read | write | `T1→T2` READ_WRITE, `T2→T1` WRITE_READ |
//! | write | read | `T2→T1` READ_WRITE, `T1→T2` WRITE_READ |
//! | write | write | `T1→T2` and `T2→T1` WRITE_WRITE |
//!
//! Both edges of a pair share the edge name `"T1-T2-i-j"`: they are one
//! conflict seen from two directions and never both count toward a cycle.
//!
//! ## Dominance
//!
//! An RW/WR pair is dominated when a WW pair between the same two templates
//! shares its writing statement and its other endpoint binds the same row
//! as the pair's reading statement. Write ordering already serializes such
//! a conflict, so every dominated pair is removed.

use rustc_hash::FxHashSet;
use std::fmt;
use tailor_core::{StatementRef, StatementTemplate, TemplateId, TransactionTemplate};
use tracing::debug;

/// Kind of a dependency edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// `from` reads what `to` writes (anti-dependency)
    ReadWrite,
    /// `from` writes what `to` reads
    WriteRead,
    /// Both write
    WriteWrite,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::ReadWrite => f.write_str("RW"),
            EdgeKind::WriteRead => f.write_str("WR"),
            EdgeKind::WriteWrite => f.write_str("WW"),
        }
    }
}

/// A directed conflict edge between two statement templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    /// Source template
    pub from: TemplateId,
    /// Target template
    pub to: TemplateId,
    /// Conflict kind
    pub kind: EdgeKind,
    /// Conflict instance name, shared by an edge and its mirror
    pub name: String,
    /// Statement index inside `from`
    pub from_index: usize,
    /// Statement index inside `to`
    pub to_index: usize,
}

impl DependencyEdge {
    /// Statement at the source end
    pub fn from_statement(&self) -> StatementRef {
        StatementRef::new(self.from, self.from_index)
    }

    /// Statement at the target end
    pub fn to_statement(&self) -> StatementRef {
        StatementRef::new(self.to, self.to_index)
    }

    /// True if the edge joins `a` and `b` in either direction
    pub fn joins(&self, a: TemplateId, b: TemplateId) -> bool {
        (self.from == a && self.to == b) || (self.from == b && self.to == a)
    }
}

/// Directed conflict multigraph over transaction templates
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    node_count: usize,
    edges: Vec<DependencyEdge>,
    /// Outgoing edge indices per node
    outgoing: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph for a set of templates
    ///
    /// Template ids must be dense: `templates[i].id() == TemplateId(i)`.
    pub fn build(templates: &[TransactionTemplate]) -> Self {
        let mut edges = Vec::new();
        let mut dominated_total = 0usize;

        for (i, t1) in templates.iter().enumerate() {
            for t2 in &templates[i + 1..] {
                let mut pair_edges = conflict_edges(t1, t2);
                dominated_total += remove_dominated(&mut pair_edges, t1, t2);
                edges.extend(pair_edges);
            }
        }

        debug!(
            target: "tailor::analysis",
            templates = templates.len(),
            edges = edges.len(),
            dominated_pairs = dominated_total,
            "Dependency graph built"
        );

        Self::from_edges(templates.len(), edges)
    }

    /// Build a graph from explicit edges
    pub fn from_edges(node_count: usize, edges: Vec<DependencyEdge>) -> Self {
        let mut outgoing = vec![Vec::new(); node_count];
        for (idx, edge) in edges.iter().enumerate() {
            if let Some(list) = outgoing.get_mut(edge.from.0 as usize) {
                list.push(idx);
            }
        }
        DependencyGraph {
            node_count,
            edges,
            outgoing,
        }
    }

    /// Number of template nodes
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// All edges
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Edge by index
    pub fn edge(&self, idx: usize) -> &DependencyEdge {
        &self.edges[idx]
    }

    /// Indices of edges leaving `node`
    pub fn outgoing(&self, node: TemplateId) -> &[usize] {
        self.outgoing
            .get(node.0 as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Edges joining `a` and `b` in either direction
    pub fn edges_between(
        &self,
        a: TemplateId,
        b: TemplateId,
    ) -> impl Iterator<Item = &DependencyEdge> + '_ {
        self.edges.iter().filter(move |e| e.joins(a, b))
    }
}

/// All conflict edges between two distinct templates, before dominance
fn conflict_edges(t1: &TransactionTemplate, t2: &TransactionTemplate) -> Vec<DependencyEdge> {
    let mut edges = Vec::new();

    for (si, s1) in t1.statements().iter().enumerate() {
        if s1.is_skipped() {
            continue;
        }
        for (sj, s2) in t2.statements().iter().enumerate() {
            if s2.is_skipped() || s1.relation() != s2.relation() {
                continue;
            }
            let name = format!("{}-{}-{}-{}", t1.name(), t2.name(), si, sj);
            let forward = |kind| DependencyEdge {
                from: t1.id(),
                to: t2.id(),
                kind,
                name: name.clone(),
                from_index: si,
                to_index: sj,
            };
            let backward = |kind| DependencyEdge {
                from: t2.id(),
                to: t1.id(),
                kind,
                name: name.clone(),
                from_index: sj,
                to_index: si,
            };

            match (s1.kind().is_write(), s2.kind().is_write()) {
                (false, false) => {}
                (false, true) => {
                    edges.push(forward(EdgeKind::ReadWrite));
                    edges.push(backward(EdgeKind::WriteRead));
                }
                (true, false) => {
                    edges.push(backward(EdgeKind::ReadWrite));
                    edges.push(forward(EdgeKind::WriteRead));
                }
                (true, true) => {
                    edges.push(forward(EdgeKind::WriteWrite));
                    edges.push(backward(EdgeKind::WriteWrite));
                }
            }
        }
    }

    edges
}

/// Remove every RW/WR pair dominated by a WW pair; returns pairs removed
fn remove_dominated(
    edges: &mut Vec<DependencyEdge>,
    t1: &TransactionTemplate,
    t2: &TransactionTemplate,
) -> usize {
    let mut dominated: FxHashSet<String> = FxHashSet::default();
    for rw in edges.iter().filter(|e| e.kind == EdgeKind::ReadWrite) {
        let Some(reader) = statement_of(t1, t2, rw.from, rw.from_index) else {
            continue;
        };
        let covered = edges.iter().any(|ww| {
            ww.kind == EdgeKind::WriteWrite
                && ww.from == rw.from
                && ww.to == rw.to
                && ww.to_index == rw.to_index
                && statement_of(t1, t2, ww.from, ww.from_index)
                    .is_some_and(|other| same_row(other, reader))
        });
        if covered {
            dominated.insert(rw.name.clone());
        }
    }

    if dominated.is_empty() {
        return 0;
    }
    for name in &dominated {
        debug!(target: "tailor::analysis", edge = %name, "Removing dominated RW/WR pair");
    }
    edges.retain(|e| e.kind == EdgeKind::WriteWrite || !dominated.contains(&e.name));
    dominated.len()
}

fn statement_of<'a>(
    t1: &'a TransactionTemplate,
    t2: &'a TransactionTemplate,
    template: TemplateId,
    index: usize,
) -> Option<&'a StatementTemplate> {
    if template == t1.id() {
        t1.statement(index)
    } else {
        t2.statement(index)
    }
}

/// Two statements address the same row if they bind the same columns of one relation
fn same_row(a: &StatementTemplate, b: &StatementTemplate) -> bool {
    a.relation() == b.relation() && a.where_columns() == b.where_columns()
}
