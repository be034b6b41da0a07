//! Offline workload analysis
//!
//! This crate runs once per workload, before any online traffic:
//! - TemplateRegistry: registration of transaction and statement templates
//! - DependencyGraph: conflict multigraph with dominated edges removed
//! - detect: induced-cycle enumeration and RC/SI classification
//! - AnalyzedWorkload: the frozen, flagged templates handed to workers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod detector;
pub mod graph;
pub mod registry;
pub mod workload;

pub use detector::{detect, find_cycles, Cycle, DetectionReport};
pub use graph::{DependencyEdge, DependencyGraph, EdgeKind};
pub use registry::{StatementSpec, TemplateRegistry};
pub use workload::AnalyzedWorkload;
