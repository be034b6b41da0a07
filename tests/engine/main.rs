//! Engine Integration Tests
//!
//! Tests for workers running analyzed workloads against a store, commit-time
//! validation and live protocol switching.

#[path = "../common/mod.rs"]
mod common;

mod config;
mod validation;
