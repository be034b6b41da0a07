//! Statement and transaction templates
//!
//! A transaction template is the registered shape of one transaction type:
//! an ordered list of parameterized statements. Statement templates carry
//! the WHERE-clause bindings used to derive validation keys at runtime and
//! the two validation flags written by dangerous-structure detection.
//!
//! Templates are owned by the registry while analysis runs and become
//! read-only once the workload is frozen. Each online worker takes a deep
//! copy at startup, so runtime flag reads never touch shared state.

use crate::error::{TailorError, TailorResult};
use crate::limits::MAX_STATEMENTS_PER_TEMPLATE;
use crate::types::{OperationKind, TemplateId, ValidationProtocol};
use crate::value::Value;
use std::collections::BTreeMap;

/// Maps one statement placeholder to the column it constrains
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WhereBinding {
    /// Zero-based placeholder index into the runtime argument list
    pub placeholder: usize,
    /// Column name the placeholder is compared against
    pub column: String,
}

impl WhereBinding {
    /// Create a new binding
    pub fn new(placeholder: usize, column: impl Into<String>) -> Self {
        WhereBinding {
            placeholder,
            column: column.into(),
        }
    }
}

/// One parameterized statement of a transaction template
#[derive(Debug, Clone, PartialEq)]
pub struct StatementTemplate {
    kind: OperationKind,
    relation: String,
    sql: String,
    bindings: Vec<WhereBinding>,
    needs_validation_si: bool,
    needs_validation_rc: bool,
    skip: bool,
}

impl StatementTemplate {
    /// Create a statement template with both validation flags cleared
    pub fn new(
        kind: OperationKind,
        relation: impl Into<String>,
        sql: impl Into<String>,
        bindings: Vec<WhereBinding>,
    ) -> Self {
        StatementTemplate {
            kind,
            relation: relation.into(),
            sql: sql.into(),
            bindings,
            needs_validation_si: false,
            needs_validation_rc: false,
            skip: false,
        }
    }

    /// Exclude this statement from dependency analysis
    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Operation kind
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Relation touched by the statement
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Statement text (after registration-time rewriting)
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// WHERE-clause bindings in declaration order
    pub fn bindings(&self) -> &[WhereBinding] {
        &self.bindings
    }

    /// Whether the statement is excluded from dependency analysis
    pub fn is_skipped(&self) -> bool {
        self.skip
    }

    /// Must be validated when running under SI_TAILOR
    pub fn needs_validation_under_si(&self) -> bool {
        self.needs_validation_si
    }

    /// Must be validated when running under RC_TAILOR
    pub fn needs_validation_under_rc(&self) -> bool {
        self.needs_validation_rc
    }

    /// Whether the statement is flagged under any protocol
    pub fn needs_validation(&self) -> bool {
        self.needs_validation_si || self.needs_validation_rc
    }

    /// Whether the statement is flagged for the given protocol
    pub fn needs_validation_under(&self, protocol: ValidationProtocol) -> bool {
        match protocol {
            ValidationProtocol::SiTailor => self.needs_validation_si,
            ValidationProtocol::RcTailor => self.needs_validation_rc,
        }
    }

    /// Set the validation flag for a protocol
    ///
    /// Only dangerous-structure detection calls this, before the workload
    /// is frozen. Setting an already-set flag is a no-op.
    pub fn mark_validation(&mut self, protocol: ValidationProtocol) {
        match protocol {
            ValidationProtocol::SiTailor => self.needs_validation_si = true,
            ValidationProtocol::RcTailor => self.needs_validation_rc = true,
        }
    }

    /// Column names bound in the WHERE clause, sorted
    pub fn where_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = self.bindings.iter().map(|b| b.column.as_str()).collect();
        columns.sort_unstable();
        columns.dedup();
        columns
    }

    /// Resolve runtime arguments into a column → value map
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a binding refers to a placeholder past the
    /// end of `args`.
    pub fn resolve_where(&self, args: &[Value]) -> TailorResult<BTreeMap<String, Value>> {
        let mut resolved = BTreeMap::new();
        for binding in &self.bindings {
            let value = args.get(binding.placeholder).ok_or_else(|| {
                TailorError::invalid_input(format!(
                    "placeholder {} for column '{}' missing: {} argument(s) supplied",
                    binding.placeholder,
                    binding.column,
                    args.len()
                ))
            })?;
            resolved.insert(binding.column.clone(), value.clone());
        }
        Ok(resolved)
    }
}

/// Registered shape of one transaction type
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionTemplate {
    id: TemplateId,
    name: String,
    statements: Vec<StatementTemplate>,
}

impl TransactionTemplate {
    /// Create an empty template
    pub fn new(id: TemplateId, name: impl Into<String>) -> Self {
        TransactionTemplate {
            id,
            name: name.into(),
            statements: Vec::with_capacity(MAX_STATEMENTS_PER_TEMPLATE),
        }
    }

    /// Template identifier (the transaction type tag)
    pub fn id(&self) -> TemplateId {
        self.id
    }

    /// Template name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Statements in registration order
    pub fn statements(&self) -> &[StatementTemplate] {
        &self.statements
    }

    /// Statement at `index`
    pub fn statement(&self, index: usize) -> Option<&StatementTemplate> {
        self.statements.get(index)
    }

    /// Mutable statement access for flag marking during analysis
    pub fn statement_mut(&mut self, index: usize) -> Option<&mut StatementTemplate> {
        self.statements.get_mut(index)
    }

    /// Number of registered statements
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// True if no statement has been registered
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Append a statement, returning its index
    ///
    /// # Errors
    ///
    /// Returns `Registration` when the template already holds
    /// `MAX_STATEMENTS_PER_TEMPLATE` statements.
    pub fn push(&mut self, statement: StatementTemplate) -> TailorResult<usize> {
        if self.statements.len() >= MAX_STATEMENTS_PER_TEMPLATE {
            return Err(TailorError::registration(format!(
                "template '{}' already holds the maximum of {} statements",
                self.name, MAX_STATEMENTS_PER_TEMPLATE
            )));
        }
        self.statements.push(statement);
        Ok(self.statements.len() - 1)
    }
}
