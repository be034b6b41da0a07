//! Template registry
//!
//! Collects transaction templates and their statements during the offline
//! registration phase. Registration closes with [`TemplateRegistry::analyze`],
//! which builds the dependency graph, runs dangerous-structure detection and
//! freezes the flagged templates into an [`AnalyzedWorkload`].
//!
//! Rejected registrations never modify already-registered templates.

use std::collections::HashMap;
use std::sync::Arc;

use tailor_core::{
    IdentityRewriter, OperationKind, SqlRewriter, StatementTemplate, TailorError, TailorResult,
    TemplateId, TransactionTemplate, WhereBinding,
};
use tracing::{debug, info};

use crate::detector::detect;
use crate::graph::DependencyGraph;
use crate::workload::AnalyzedWorkload;

/// Description of a statement to register
#[derive(Debug, Clone)]
pub struct StatementSpec {
    kind: OperationKind,
    relation: String,
    sql: String,
    bindings: Vec<WhereBinding>,
    skip: bool,
}

impl StatementSpec {
    /// Describe a statement of any kind
    pub fn new(kind: OperationKind, relation: impl Into<String>, sql: impl Into<String>) -> Self {
        StatementSpec {
            kind,
            relation: relation.into(),
            sql: sql.into(),
            bindings: Vec::new(),
            skip: false,
        }
    }

    /// Describe a point read
    pub fn read(relation: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(OperationKind::Read, relation, sql)
    }

    /// Describe a write
    pub fn write(relation: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(OperationKind::Write, relation, sql)
    }

    /// Describe a range read
    pub fn scan(relation: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(OperationKind::Scan, relation, sql)
    }

    /// Bind placeholder `placeholder` to WHERE column `column`
    pub fn bind(mut self, placeholder: usize, column: impl Into<String>) -> Self {
        self.bindings.push(WhereBinding::new(placeholder, column));
        self
    }

    /// Exclude the statement from dependency analysis
    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }
}

/// Registry of transaction templates for one workload
pub struct TemplateRegistry {
    templates: Vec<TransactionTemplate>,
    by_name: HashMap<String, TemplateId>,
    rewriter: Arc<dyn SqlRewriter>,
}

impl std::fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("templates", &self.templates.len())
            .finish()
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRegistry {
    /// Create a registry that stores statement text unchanged
    pub fn new() -> Self {
        Self::with_rewriter(Arc::new(IdentityRewriter))
    }

    /// Create a registry that rewrites each statement once at registration
    pub fn with_rewriter(rewriter: Arc<dyn SqlRewriter>) -> Self {
        TemplateRegistry {
            templates: Vec::new(),
            by_name: HashMap::new(),
            rewriter,
        }
    }

    /// Register a transaction template name
    ///
    /// # Errors
    ///
    /// Returns `Registration` for an empty or duplicate name.
    pub fn register_transaction(&mut self, name: &str) -> TailorResult<TemplateId> {
        if name.trim().is_empty() {
            return Err(TailorError::registration("transaction name must not be empty"));
        }
        if self.by_name.contains_key(name) {
            return Err(TailorError::registration(format!(
                "transaction '{}' is already registered",
                name
            )));
        }

        let id = TemplateId(self.templates.len() as u32);
        self.templates.push(TransactionTemplate::new(id, name));
        self.by_name.insert(name.to_string(), id);
        debug!(target: "tailor::analysis", template = %name, id = %id, "Transaction registered");
        Ok(id)
    }

    /// Register a statement for `transaction`, returning its index
    ///
    /// # Errors
    ///
    /// Returns `Registration` if the transaction is unknown, the relation is
    /// empty, the template is full, or the rewriter rejects the statement.
    pub fn register_statement(&mut self, transaction: &str, spec: StatementSpec) -> TailorResult<usize> {
        let id = *self.by_name.get(transaction).ok_or_else(|| {
            TailorError::registration(format!("transaction '{}' is not registered", transaction))
        })?;
        if spec.relation.trim().is_empty() {
            return Err(TailorError::registration(format!(
                "statement for '{}' has no relation",
                transaction
            )));
        }

        let sql = self
            .rewriter
            .rewrite(spec.kind, &spec.relation, &spec.sql)
            .map_err(|e| TailorError::registration(format!("rewrite failed: {}", e)))?;

        let mut statement = StatementTemplate::new(spec.kind, spec.relation, sql, spec.bindings);
        if spec.skip {
            statement = statement.skipped();
        }

        let template = &mut self.templates[id.0 as usize];
        template.push(statement)
    }

    /// Look up a registered template
    pub fn template(&self, name: &str) -> Option<&TransactionTemplate> {
        self.by_name
            .get(name)
            .map(|id| &self.templates[id.0 as usize])
    }

    /// Number of registered templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// True if nothing has been registered
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Close registration and run offline analysis
    ///
    /// Builds the dependency graph, detects dangerous structures and sets
    /// the validation flags. The returned workload is immutable.
    ///
    /// # Errors
    ///
    /// Returns `Registration` if any template has no statements.
    pub fn analyze(self) -> TailorResult<AnalyzedWorkload> {
        if let Some(empty) = self.templates.iter().find(|t| t.is_empty()) {
            return Err(TailorError::registration(format!(
                "transaction '{}' has no statements",
                empty.name()
            )));
        }

        let mut templates = self.templates;
        let graph = DependencyGraph::build(&templates);
        let report = detect(&graph);
        report.apply(&mut templates)?;

        info!(
            target: "tailor::analysis",
            templates = templates.len(),
            rc_statements = report.rc_statements.len(),
            si_statements = report.si_statements.len(),
            "Workload analyzed; validation flags frozen"
        );

        Ok(AnalyzedWorkload::new(templates, self.by_name, graph, report))
    }
}
