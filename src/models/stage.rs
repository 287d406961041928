//! Stage model

use super::task::{Task, TaskSpec};
use crate::error::Result;
use crate::execution::ExecutionStrategy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a stage's tasks relate to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageType {
    Parallel,
    Sequential,
    DependencyOrdered,
}

impl StageType {
    /// Execution strategy used when the stage does not override it
    pub fn default_strategy(&self) -> ExecutionStrategy {
        match self {
            Self::Parallel => ExecutionStrategy::Parallel,
            Self::Sequential => ExecutionStrategy::Sequential,
            Self::DependencyOrdered => ExecutionStrategy::DependencyOrdered,
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parallel => write!(f, "parallel"),
            Self::Sequential => write!(f, "sequential"),
            Self::DependencyOrdered => write!(f, "dependency-ordered"),
        }
    }
}

/// An ordered group of tasks executed with one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    #[serde(rename = "type")]
    pub stage_type: StageType,
    pub tasks: Vec<Task>,
    /// Overrides the strategy implied by `stage_type` (e.g. batch, pipeline)
    #[serde(default)]
    pub strategy: Option<ExecutionStrategy>,
}

impl Stage {
    pub fn new(name: impl Into<String>, stage_type: StageType, tasks: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            stage_type,
            tasks,
            strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn effective_strategy(&self) -> ExecutionStrategy {
        self.strategy.unwrap_or_else(|| self.stage_type.default_strategy())
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }
}

/// Unvalidated stage as submitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub stage_type: StageType,
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub strategy: Option<ExecutionStrategy>,
}

impl StageSpec {
    pub fn into_stage(self, position: usize) -> Result<Stage> {
        let tasks = self
            .tasks
            .into_iter()
            .map(TaskSpec::into_task)
            .collect::<Result<Vec<_>>>()?;
        let name = self
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("stage-{}", position + 1));

        Ok(Stage {
            name,
            stage_type: self.stage_type,
            tasks,
            strategy: self.strategy,
        })
    }
}

impl From<Stage> for StageSpec {
    fn from(stage: Stage) -> Self {
        Self {
            name: Some(stage.name),
            stage_type: stage.stage_type,
            tasks: stage.tasks.into_iter().map(TaskSpec::from).collect(),
            strategy: stage.strategy,
        }
    }
}
