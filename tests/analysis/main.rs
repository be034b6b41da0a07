//! Analysis Integration Tests
//!
//! Tests for template registration, dependency-graph construction and
//! dangerous-structure detection on whole workloads.

#[path = "../common/mod.rs"]
mod common;

mod scenarios;
