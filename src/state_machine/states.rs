use serde::{Deserialize, Serialize};
use std::fmt;

/// Orchestration (job) lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationState {
    /// Work order accepted and planned, not yet executing
    #[default]
    Planning,
    /// Stages are being executed
    Executing,
    /// Every stage completed (possibly after recovery)
    Completed,
    /// A stage failed and recovery could not resolve it
    Failed,
    /// Cancelled by the caller or by a recovery strategy
    Cancelled,
}

impl OrchestrationState {
    /// Terminal orchestrations are immutable
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Check whether a transition to `next` is permitted
    pub fn can_transition_to(&self, next: OrchestrationState) -> bool {
        match (self, next) {
            (Self::Planning, Self::Executing) => true,
            (Self::Planning, Self::Cancelled) => true,
            (Self::Planning, Self::Failed) => true,
            (Self::Executing, Self::Completed) => true,
            (Self::Executing, Self::Failed) => true,
            (Self::Executing, Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Executing => write!(f, "executing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for OrchestrationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Self::Planning),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid orchestration state: {s}")),
        }
    }
}

/// Task execution states
///
/// A task that actually runs moves `queued -> running -> {succeeded, failed}`.
/// `blocked` and `cancelled` mark tasks that were never started; `skipped`
/// marks a failed task resolved by the skip-task recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
    /// Not started: a dependency failed or a sequential stage halted
    Blocked,
    /// Not started: the orchestration was cancelled
    Cancelled,
    /// Resolved by recovery without running to success
    Skipped,
}

impl TaskState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }

    /// Check if this is an active state (task is being processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if this task satisfies dependencies for other tasks
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    /// States that make the owning stage fail
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Blocked)
    }

    /// Check whether a transition to `next` is permitted
    ///
    /// Terminal states may be re-entered only through a fresh execution
    /// attempt (`running`), which is how retries update a stored result.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (Self::Queued, _) => next != Self::Queued,
            (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled) => true,
            (Self::Failed | Self::Blocked | Self::Cancelled, Self::Running) => true,
            (Self::Failed | Self::Blocked, Self::Skipped) => true,
            (Self::Blocked | Self::Cancelled, Self::Blocked | Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Blocked => write!(f, "blocked"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "blocked" => Ok(Self::Blocked),
            "cancelled" => Ok(Self::Cancelled),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}
