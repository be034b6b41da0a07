//! Concurrency Integration Tests
//!
//! Tests for the validation lock state machine, the sharded lock table,
//! the version cache and the commit-time validation pipeline.

#[path = "../common/mod.rs"]
mod common;

mod lock_state;
mod pipeline;
mod versions;
