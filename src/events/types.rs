//! Lifecycle event payloads

use crate::constants::events;
use crate::recovery::RecoveryStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything the orchestrator reports to monitoring sinks
///
/// Each variant maps to one `domain:action` event name; see [`LifecycleEvent::name`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    OrchestrationStarted {
        orchestration_id: Uuid,
        name: String,
        stage_count: usize,
    },
    OrchestrationCompleted {
        orchestration_id: Uuid,
        duration_ms: u64,
    },
    OrchestrationFailed {
        orchestration_id: Uuid,
        error: String,
    },
    OrchestrationCancelled {
        orchestration_id: Uuid,
    },
    OrchestrationPaused {
        orchestration_id: Uuid,
    },
    OrchestrationResumed {
        orchestration_id: Uuid,
    },
    StageStarted {
        orchestration_id: Uuid,
        stage: String,
        task_count: usize,
    },
    StageCompleted {
        orchestration_id: Uuid,
        stage: String,
        succeeded: usize,
    },
    StageFailed {
        orchestration_id: Uuid,
        stage: String,
        failed: usize,
        error: String,
    },
    TaskStarted {
        orchestration_id: Uuid,
        task_id: String,
        task_type: String,
        attempt: u32,
    },
    TaskCompleted {
        orchestration_id: Uuid,
        task_id: String,
        duration_ms: u64,
    },
    TaskFailed {
        orchestration_id: Uuid,
        task_id: String,
        error: String,
    },
    RecoveryCompleted {
        record_id: Uuid,
        orchestration_id: Option<Uuid>,
        failure_type: String,
        status: RecoveryStatus,
        escalated: bool,
        attempts: usize,
    },
    RollbackStarted {
        orchestration_id: Uuid,
        repositories: Vec<String>,
    },
    RollbackCompleted {
        orchestration_id: Uuid,
        rolled_back: usize,
        failed: usize,
    },
}

impl LifecycleEvent {
    /// Wire name, e.g. `task:failed`
    pub fn name(&self) -> &'static str {
        match self {
            Self::OrchestrationStarted { .. } => events::ORCHESTRATION_STARTED,
            Self::OrchestrationCompleted { .. } => events::ORCHESTRATION_COMPLETED,
            Self::OrchestrationFailed { .. } => events::ORCHESTRATION_FAILED,
            Self::OrchestrationCancelled { .. } => events::ORCHESTRATION_CANCELLED,
            Self::OrchestrationPaused { .. } => events::ORCHESTRATION_PAUSED,
            Self::OrchestrationResumed { .. } => events::ORCHESTRATION_RESUMED,
            Self::StageStarted { .. } => events::STAGE_STARTED,
            Self::StageCompleted { .. } => events::STAGE_COMPLETED,
            Self::StageFailed { .. } => events::STAGE_FAILED,
            Self::TaskStarted { .. } => events::TASK_STARTED,
            Self::TaskCompleted { .. } => events::TASK_COMPLETED,
            Self::TaskFailed { .. } => events::TASK_FAILED,
            Self::RecoveryCompleted { .. } => events::RECOVERY_COMPLETED,
            Self::RollbackStarted { .. } => events::ROLLBACK_STARTED,
            Self::RollbackCompleted { .. } => events::ROLLBACK_COMPLETED,
        }
    }

    pub fn orchestration_id(&self) -> Option<Uuid> {
        match self {
            Self::OrchestrationStarted { orchestration_id, .. }
            | Self::OrchestrationCompleted { orchestration_id, .. }
            | Self::OrchestrationFailed { orchestration_id, .. }
            | Self::OrchestrationCancelled { orchestration_id }
            | Self::OrchestrationPaused { orchestration_id }
            | Self::OrchestrationResumed { orchestration_id }
            | Self::RollbackStarted { orchestration_id, .. }
            | Self::RollbackCompleted { orchestration_id, .. }
            | Self::StageStarted { orchestration_id, .. }
            | Self::StageCompleted { orchestration_id, .. }
            | Self::StageFailed { orchestration_id, .. }
            | Self::TaskStarted { orchestration_id, .. }
            | Self::TaskCompleted { orchestration_id, .. }
            | Self::TaskFailed { orchestration_id, .. } => Some(*orchestration_id),
            Self::RecoveryCompleted { orchestration_id, .. } => *orchestration_id,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let id = Uuid::new_v4();
        let started = LifecycleEvent::TaskStarted {
            orchestration_id: id,
            task_id: "deploy-api".into(),
            task_type: "deploy".into(),
            attempt: 1,
        };
        assert_eq!(started.name(), "task:started");
        assert_eq!(started.task_id(), Some("deploy-api"));
        assert_eq!(started.orchestration_id(), Some(id));

        let cancelled = LifecycleEvent::OrchestrationCancelled { orchestration_id: id };
        assert_eq!(cancelled.name(), "orchestration:cancelled");
    }

    #[test]
    fn test_serializes_with_event_tag() {
        let event = LifecycleEvent::StageFailed {
            orchestration_id: Uuid::nil(),
            stage: "deploy".into(),
            failed: 1,
            error: "boom".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "stage_failed");
        assert_eq!(json["failed"], 1);
    }
}
