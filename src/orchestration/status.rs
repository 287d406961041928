//! Query-surface types: status reports, summaries and failure reports

use crate::execution::{ExecutionStrategy, TaskCounts, TaskResultEntry};
use crate::models::StageType;
use crate::planning::ExecutionPlan;
use crate::recovery::FailureScope;
use crate::state_machine::OrchestrationState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub stage_type: StageType,
    pub strategy: ExecutionStrategy,
    pub task_count: usize,
    pub status: StageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    /// Every dispatched rollback task succeeded
    Completed,
    /// At least one rollback task did not succeed
    Partial,
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

/// Rollback of a failed orchestration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub status: RollbackStatus,
    /// In dispatch order: latest stage first
    pub repositories: Vec<String>,
    /// Results of the `rollback` tasks, sorted by task id
    pub results: Vec<TaskResultEntry>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Task progress over every task of every stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    /// Succeeded or skipped
    pub succeeded: usize,
    /// Failed, blocked or cancelled
    pub failed: usize,
    /// Queued or running
    pub pending: usize,
    /// Share of tasks in a terminal state, 0 to 100
    pub percentage: f64,
}

impl From<TaskCounts> for Progress {
    fn from(counts: TaskCounts) -> Self {
        let percentage = if counts.total == 0 {
            0.0
        } else {
            counts.terminal() as f64 * 100.0 / counts.total as f64
        };
        Self {
            total: counts.total,
            succeeded: counts.succeeded + counts.skipped,
            failed: counts.failed + counts.blocked + counts.cancelled,
            pending: counts.queued + counts.running,
            percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationStatusReport {
    pub id: Uuid,
    pub name: String,
    pub status: OrchestrationState,
    /// New tasks are held back until resumed
    pub paused: bool,
    pub dry_run: bool,
    pub current_stage: Option<String>,
    pub stages: Vec<StageSummary>,
    /// Sorted by task id
    pub results: Vec<TaskResultEntry>,
    pub progress: Progress,
    pub error: Option<String>,
    pub failed_stage: Option<String>,
    pub failed_task: Option<String>,
    /// Recovery record ids, in the order recoveries ran
    pub recoveries: Vec<Uuid>,
    /// Present when the work order was planned from repositories
    pub plan: Option<ExecutionPlan>,
    /// Present when a failed orchestration was rolled back
    pub rollback: Option<RollbackReport>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OrchestrationStatusReport {
    pub fn result(&self, task_id: &str) -> Option<&TaskResultEntry> {
        self.results.iter().find(|entry| entry.task_id == task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationSummary {
    pub id: Uuid,
    pub name: String,
    pub status: OrchestrationState,
    pub paused: bool,
    pub current_stage: Option<String>,
    pub stage_count: usize,
    pub progress: Progress,
    pub created_at: DateTime<Utc>,
}

/// Failure detected outside the engine, e.g. by a watchdog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub scope: FailureScope,
    pub error: String,
    /// Skip classification and use this type
    #[serde(default)]
    pub failure_type: Option<String>,
    /// Defaults to the current stage
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub task_ids: Vec<String>,
}

impl FailureReport {
    pub fn new(scope: FailureScope, error: impl Into<String>) -> Self {
        Self {
            scope,
            error: error.into(),
            failure_type: None,
            stage: None,
            task_ids: Vec::new(),
        }
    }

    pub fn with_failure_type(mut self, failure_type: impl Into<String>) -> Self {
        self.failure_type = Some(failure_type.into());
        self
    }

    pub fn for_tasks(mut self, task_ids: Vec<String>) -> Self {
        self.task_ids = task_ids;
        self
    }
}
