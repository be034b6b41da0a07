//! Fixed limits shared across crates

/// Maximum number of statements a transaction template can hold
pub const MAX_STATEMENTS_PER_TEMPLATE: usize = 15;

/// Default number of lock-table buckets per relation
pub const DEFAULT_BUCKET_COUNT: usize = 1024;
