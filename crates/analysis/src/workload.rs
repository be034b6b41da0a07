//! Frozen result of offline analysis
//!
//! An `AnalyzedWorkload` owns the flagged templates, the dependency graph
//! and the detection report. It exposes no mutation: once analysis
//! completes, validation flags never change for the life of the process.
//! Workers take their own deep copy via [`AnalyzedWorkload::clone_templates`].

use std::collections::{BTreeSet, HashMap};

use tailor_core::{StatementTemplate, TemplateId, TransactionTemplate};

use crate::detector::DetectionReport;
use crate::graph::DependencyGraph;

/// Analyzed, immutable workload
#[derive(Debug, Clone)]
pub struct AnalyzedWorkload {
    templates: Vec<TransactionTemplate>,
    by_name: HashMap<String, TemplateId>,
    graph: DependencyGraph,
    report: DetectionReport,
}

impl AnalyzedWorkload {
    pub(crate) fn new(
        templates: Vec<TransactionTemplate>,
        by_name: HashMap<String, TemplateId>,
        graph: DependencyGraph,
        report: DetectionReport,
    ) -> Self {
        AnalyzedWorkload {
            templates,
            by_name,
            graph,
            report,
        }
    }

    /// All templates, indexed by `TemplateId`
    pub fn templates(&self) -> &[TransactionTemplate] {
        &self.templates
    }

    /// Template by name
    pub fn template(&self, name: &str) -> Option<&TransactionTemplate> {
        self.template_id(name)
            .map(|id| &self.templates[id.0 as usize])
    }

    /// Template id by name
    pub fn template_id(&self, name: &str) -> Option<TemplateId> {
        self.by_name.get(name).copied()
    }

    /// Statement by template name and index
    pub fn statement(&self, name: &str, index: usize) -> Option<&StatementTemplate> {
        self.template(name).and_then(|t| t.statement(index))
    }

    /// Deep copy of every template, flags included
    pub fn clone_templates(&self) -> Vec<TransactionTemplate> {
        self.templates.clone()
    }

    /// Name → id map for the cloned templates
    pub fn name_index(&self) -> HashMap<String, TemplateId> {
        self.by_name.clone()
    }

    /// Every relation touched by any statement
    pub fn relations(&self) -> BTreeSet<String> {
        self.templates
            .iter()
            .flat_map(|t| t.statements())
            .map(|s| s.relation().to_string())
            .collect()
    }

    /// Dependency graph the flags were derived from
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Detection report the flags were derived from
    pub fn report(&self) -> &DetectionReport {
        &self.report
    }
}
