//! Default validation-key derivation
//!
//! A WHERE clause binding a single integer column uses the integer itself
//! as the key, which keeps keys readable in logs and tests. Any other shape
//! is hashed with FxHash over the column/value pairs in column order, so
//! the same bindings always produce the same key within and across runs.
//!
//! A statement that binds no WHERE columns (a relation-wide scan) maps to
//! one fixed key per relation, so all such statements on a relation
//! validate against the same entry.

use std::collections::BTreeMap;
use std::hash::Hasher;

use rustc_hash::FxHasher;
use tailor_core::{KeyDeriver, TailorResult, Value};

/// Tag byte separating relation-wide keys from column hashes
const RELATION_WIDE_TAG: u8 = 0xfe;

/// Fixed key shared by every unbound statement on `relation`
pub fn relation_wide_key(relation: &str) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u8(RELATION_WIDE_TAG);
    hasher.write(relation.as_bytes());
    hasher.finish()
}

/// Key deriver used when a workload supplies none
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnKeyDeriver;

impl KeyDeriver for ColumnKeyDeriver {
    fn derive(&self, relation: &str, columns: &BTreeMap<String, Value>) -> TailorResult<u64> {
        if columns.is_empty() {
            return Ok(relation_wide_key(relation));
        }
        if columns.len() == 1 {
            if let Some(Value::Int(v)) = columns.values().next() {
                return Ok(*v as u64);
            }
        }

        let mut hasher = FxHasher::default();
        for (column, value) in columns {
            hasher.write(column.as_bytes());
            hash_value(&mut hasher, value);
        }
        Ok(hasher.finish())
    }
}

fn hash_value(hasher: &mut FxHasher, value: &Value) {
    match value {
        Value::Null => hasher.write_u8(0),
        Value::Bool(b) => {
            hasher.write_u8(1);
            hasher.write_u8(*b as u8);
        }
        Value::Int(v) => {
            hasher.write_u8(2);
            hasher.write_i64(*v);
        }
        Value::Float(v) => {
            hasher.write_u8(3);
            hasher.write_u64(v.to_bits());
        }
        Value::String(s) => {
            hasher.write_u8(4);
            hasher.write(s.as_bytes());
            hasher.write_u8(0xff);
        }
        Value::Bytes(b) => {
            hasher.write_u8(5);
            hasher.write_usize(b.len());
            hasher.write(b);
        }
    }
}
