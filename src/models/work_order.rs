//! Work order: what a caller submits for orchestration

use super::stage::StageSpec;
use super::task::TaskType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Caller-controlled behavior for one orchestration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationOptions {
    /// Keep executing later stages after a stage fails
    pub continue_on_error: bool,
    /// Start dependents even when a dependency in the same stage failed
    pub continue_past_failed_dependencies: bool,
    /// Overrides `planning.parallel_enabled` for this run
    pub parallel_enabled: Option<bool>,
    /// When the orchestration fails, dispatch `rollback` tasks for every
    /// repository that already succeeded, latest stage first
    pub rollback_on_failure: bool,
    /// Plan and walk every stage without dispatching task handlers
    pub dry_run: bool,
}

/// Where the stages of a work order come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WorkOrderSource {
    /// Caller-defined stages
    Stages { stages: Vec<StageSpec> },
    /// Repositories planned into phases from their dependency map; every
    /// repository receives one task per entry in `task_types`, in order
    Repositories {
        repositories: Vec<String>,
        dependencies: HashMap<String, Vec<String>>,
        task_types: Vec<TaskType>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub name: String,
    pub source: WorkOrderSource,
    #[serde(default)]
    pub options: OrchestrationOptions,
}

impl WorkOrder {
    pub fn from_stages(name: impl Into<String>, stages: Vec<StageSpec>) -> Self {
        Self {
            name: name.into(),
            source: WorkOrderSource::Stages { stages },
            options: OrchestrationOptions::default(),
        }
    }

    pub fn for_repositories(
        name: impl Into<String>,
        repositories: Vec<String>,
        dependencies: HashMap<String, Vec<String>>,
        task_types: Vec<TaskType>,
    ) -> Self {
        Self {
            name: name.into(),
            source: WorkOrderSource::Repositories {
                repositories,
                dependencies,
                task_types,
            },
            options: OrchestrationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OrchestrationOptions) -> Self {
        self.options = options;
        self
    }
}
