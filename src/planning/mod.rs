//! # Phase Planning
//!
//! Turns a dependency graph and a target set into ordered phases of mutually
//! independent nodes, and phases into executable stages.

pub mod planner;

pub use planner::{ExecutionPlan, Phase, PhasePlanner, RollbackPhase};

use crate::graph::GraphError;
use thiserror::Error;

/// Planning failures; all of them are fatal and never enter recovery
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("Circular dependency detected: {}", crate::error::format_cycles(.cycles))]
    CircularDependency { cycles: Vec<Vec<String>> },

    #[error("Phase {phase} could not collect any node; unresolved: {}", .remaining.join(", "))]
    Stalled { phase: usize, remaining: Vec<String> },

    #[error("At least one task type is required to build repository stages")]
    NoTaskTypes,

    #[error("Stage '{stage}' has duplicate task id '{task_id}'")]
    DuplicateTask { stage: String, task_id: String },

    #[error(transparent)]
    Graph(GraphError),
}

impl From<GraphError> for PlanningError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CircularDependency { cycles } => Self::CircularDependency { cycles },
            other => Self::Graph(other),
        }
    }
}
