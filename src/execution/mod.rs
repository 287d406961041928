//! # Task Execution
//!
//! Runs a stage's tasks under one of five strategies while every task start is
//! gated by one global concurrency budget shared by all orchestrations.
//!
//! - `parallel`: fan out everything, join everything, never short-circuit
//! - `sequential`: list order, fail-fast
//! - `dependency_ordered`: replay a dependency analysis group by group
//! - `batch`: fixed-size parallel chunks with an optional delay in between
//! - `pipeline`: sliding window of in-flight tasks

pub mod concurrency;
pub mod engine;
pub mod handlers;
pub mod results;
pub mod scope;

pub use concurrency::{ConcurrencyLimiter, ConcurrencyPermit, ConcurrencyStats};
pub use engine::{StageOutcome, TaskExecutionEngine, TaskOutcome};
pub use handlers::{HandlerRegistry, TaskExecutionContext, TaskHandler};
pub use results::{ResultStore, TaskCounts, TaskResultEntry};
pub use scope::{ExecutionOverrides, ExecutionScope};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Parallel,
    Sequential,
    #[serde(alias = "dependency-ordered")]
    DependencyOrdered,
    Batch,
    Pipeline,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parallel => write!(f, "parallel"),
            Self::Sequential => write!(f, "sequential"),
            Self::DependencyOrdered => write!(f, "dependency_ordered"),
            Self::Batch => write!(f, "batch"),
            Self::Pipeline => write!(f, "pipeline"),
        }
    }
}

impl std::str::FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parallel" => Ok(Self::Parallel),
            "sequential" => Ok(Self::Sequential),
            "dependency_ordered" | "dependency-ordered" => Ok(Self::DependencyOrdered),
            "batch" => Ok(Self::Batch),
            "pipeline" => Ok(Self::Pipeline),
            _ => Err(format!("Invalid execution strategy: {s}")),
        }
    }
}
