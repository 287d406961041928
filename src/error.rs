//! # Orchestrator Errors
//!
//! Crate-level error taxonomy. Validation and circular-dependency errors are
//! fatal to the call that raised them and never enter recovery; execution
//! failures are routed through the recovery subsystem before they surface here.

use crate::collaborators::CollaboratorError;
use crate::config::ConfigurationError;
use crate::graph::GraphError;
use crate::planning::PlanningError;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for orchestration operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Circular dependency detected: {}", format_cycles(.cycles))]
    CircularDependency { cycles: Vec<Vec<String>> },

    #[error("Planning error: {0}")]
    Planning(PlanningError),

    #[error("Graph error: {0}")]
    Graph(GraphError),

    #[error("Task '{task_id}' failed: {message}")]
    TaskExecution { task_id: String, message: String },

    #[error("Stage '{stage}' failed: {message}")]
    StageFailure { stage: String, message: String },

    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Recovery exhausted for '{failure_type}': {last_error}")]
    RecoveryExhausted {
        failure_type: String,
        last_error: String,
    },

    #[error("Orchestration not found: {0}")]
    OrchestrationNotFound(Uuid),

    #[error("Invalid state transition for {entity}: {from} -> {to}")]
    InvalidStateTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("Orchestration {0} was cancelled")]
    Cancelled(Uuid),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Orchestration service has been shut down")]
    ShutDown,
}

impl OrchestratorError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a task execution error
    pub fn task_execution(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TaskExecution {
            task_id: task_id.into(),
            message: message.into(),
        }
    }

    /// Create a stage failure error
    pub fn stage_failure(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageFailure {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create an invalid state transition error
    pub fn invalid_transition(
        entity: impl Into<String>,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidStateTransition {
            entity: entity.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Fatal errors are reported to the caller as-is and never enter recovery
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::CircularDependency { .. }
                | Self::Planning(_)
                | Self::Graph(_)
                | Self::Configuration(_)
                | Self::Collaborator(_)
        )
    }
}

impl From<GraphError> for OrchestratorError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CircularDependency { cycles } => Self::CircularDependency { cycles },
            other => Self::Graph(other),
        }
    }
}

impl From<PlanningError> for OrchestratorError {
    fn from(err: PlanningError) -> Self {
        match err {
            PlanningError::CircularDependency { cycles } => Self::CircularDependency { cycles },
            other => Self::Planning(other),
        }
    }
}

pub(crate) fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| cycle.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
