//! # Dependency Graph Analysis
//!
//! Pure graph algorithms over a `node -> [dependency]` adjacency structure:
//! cycle detection, topological ordering, parallel grouping, critical path and
//! structural risk scoring. No I/O happens here; the flattened adjacency view
//! is supplied by a [`DependencySource`](crate::collaborators::DependencySource)
//! or built directly by the caller.
//!
//! All traversals are iterative (explicit stacks over node indices), so deep
//! dependency chains never grow the call stack.

pub mod analyzer;
pub mod dependency_graph;

pub use analyzer::{DependencyAnalysis, DependencyGraphAnalyzer, RiskAssessment, RiskLevel};
pub use dependency_graph::DependencyGraph;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How two nodes are judged independent enough to share a parallel group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndependenceCheck {
    /// No transitive dependency either way, and not both touching a
    /// critical shared resource (substring match on dependency names)
    #[default]
    ResourceHeuristic,
    /// No transitive dependency either way
    Reachability,
}

/// Errors raised by graph algorithms
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Circular dependency detected: {}", crate::error::format_cycles(.cycles))]
    CircularDependency { cycles: Vec<Vec<String>> },

    #[error("Unknown node: {node}")]
    UnknownNode { node: String },
}
