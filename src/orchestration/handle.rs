//! In-memory state of one orchestration
//!
//! Stages and their analyses are fixed at submission. The mutable record sits
//! behind a lock and only changes through [`OrchestrationHandle::transition`],
//! which enforces the orchestration state machine; once terminal, nothing
//! changes any more.

use super::status::{
    OrchestrationStatusReport, OrchestrationSummary, Progress, RollbackReport, StageStatus,
    StageSummary,
};
use crate::error::{OrchestratorError, Result};
use crate::execution::{ExecutionScope, TaskCounts};
use crate::graph::DependencyAnalysis;
use crate::models::Stage;
use crate::planning::ExecutionPlan;
use crate::state_machine::{OrchestrationState, TaskState};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug)]
struct OrchestrationRecord {
    status: OrchestrationState,
    current_stage: Option<usize>,
    stage_statuses: Vec<StageStatus>,
    error: Option<String>,
    failed_stage: Option<String>,
    failed_task: Option<String>,
    recoveries: Vec<Uuid>,
    rollback: Option<RollbackReport>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct OrchestrationHandle {
    id: Uuid,
    name: String,
    stages: Vec<Stage>,
    analyses: Vec<Option<DependencyAnalysis>>,
    plan: Option<ExecutionPlan>,
    scope: ExecutionScope,
    created_at: DateTime<Utc>,
    claimed: AtomicBool,
    record: RwLock<OrchestrationRecord>,
}

impl OrchestrationHandle {
    pub(crate) fn new(
        name: String,
        stages: Vec<Stage>,
        analyses: Vec<Option<DependencyAnalysis>>,
        plan: Option<ExecutionPlan>,
        scope: ExecutionScope,
    ) -> Self {
        let stage_count = stages.len();
        Self {
            id: scope.orchestration_id(),
            name,
            stages,
            analyses,
            plan,
            scope,
            created_at: Utc::now(),
            claimed: AtomicBool::new(false),
            record: RwLock::new(OrchestrationRecord {
                status: OrchestrationState::Planning,
                current_stage: None,
                stage_statuses: vec![StageStatus::Pending; stage_count],
                error: None,
                failed_stage: None,
                failed_task: None,
                recoveries: Vec::new(),
                rollback: None,
                started_at: None,
                completed_at: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn analysis(&self, stage_index: usize) -> Option<&DependencyAnalysis> {
        self.analyses.get(stage_index).and_then(Option::as_ref)
    }

    pub fn scope(&self) -> &ExecutionScope {
        &self.scope
    }

    pub fn status(&self) -> OrchestrationState {
        self.record.read().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn current_stage_index(&self) -> Option<usize> {
        self.record.read().current_stage
    }

    /// Only the first caller gets to run the orchestration
    pub(crate) fn claim_run(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn transition(&self, next: OrchestrationState) -> Result<()> {
        let mut record = self.record.write();
        if !record.status.can_transition_to(next) {
            return Err(OrchestratorError::invalid_transition(
                format!("orchestration {}", self.id),
                record.status,
                next,
            ));
        }
        record.status = next;
        match next {
            OrchestrationState::Executing => record.started_at = Some(Utc::now()),
            state if state.is_terminal() => record.completed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    /// Move to `failed`, keeping the first failure as the reported one
    pub(crate) fn fail(
        &self,
        error: impl Into<String>,
        stage: Option<String>,
        task: Option<String>,
    ) -> Result<()> {
        self.record_failure(error, stage, task);
        self.transition(OrchestrationState::Failed)
    }

    pub(crate) fn record_failure(
        &self,
        error: impl Into<String>,
        stage: Option<String>,
        task: Option<String>,
    ) {
        let mut record = self.record.write();
        if record.status.is_terminal() || record.error.is_some() {
            return;
        }
        record.error = Some(error.into());
        record.failed_stage = stage;
        record.failed_task = task;
    }

    pub fn error(&self) -> Option<String> {
        self.record.read().error.clone()
    }

    pub(crate) fn set_stage_status(&self, index: usize, status: StageStatus) {
        let mut record = self.record.write();
        if record.status.is_terminal() {
            return;
        }
        if status == StageStatus::Running {
            record.current_stage = Some(index);
        }
        if let Some(slot) = record.stage_statuses.get_mut(index) {
            *slot = status;
        }
    }

    pub(crate) fn push_recovery(&self, record_id: Uuid) {
        self.record.write().recoveries.push(record_id);
    }

    pub(crate) fn set_rollback(&self, rollback: RollbackReport) {
        let mut record = self.record.write();
        if !record.status.is_terminal() {
            record.rollback = Some(rollback);
        }
    }

    fn task_counts(&self) -> TaskCounts {
        let results = self.scope.results();
        self.stages
            .iter()
            .flat_map(|stage| stage.tasks.iter())
            .map(|task| results.status(&task.id).unwrap_or(TaskState::Queued))
            .collect()
    }

    pub fn progress(&self) -> Progress {
        Progress::from(self.task_counts())
    }

    fn current_stage_name(&self, current: Option<usize>) -> Option<String> {
        current
            .and_then(|index| self.stages.get(index))
            .map(|stage| stage.name.clone())
    }

    pub fn report(&self) -> OrchestrationStatusReport {
        let record = self.record.read();
        let stages = self
            .stages
            .iter()
            .zip(record.stage_statuses.iter())
            .map(|(stage, status)| StageSummary {
                name: stage.name.clone(),
                stage_type: stage.stage_type,
                strategy: stage.effective_strategy(),
                task_count: stage.tasks.len(),
                status: *status,
            })
            .collect();

        OrchestrationStatusReport {
            id: self.id,
            name: self.name.clone(),
            status: record.status,
            paused: self.scope.is_paused(),
            dry_run: self.scope.options().dry_run,
            current_stage: self.current_stage_name(record.current_stage),
            stages,
            results: self.scope.results().snapshot(),
            progress: self.progress(),
            error: record.error.clone(),
            failed_stage: record.failed_stage.clone(),
            failed_task: record.failed_task.clone(),
            recoveries: record.recoveries.clone(),
            plan: self.plan.clone(),
            rollback: record.rollback.clone(),
            created_at: self.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
        }
    }

    pub fn summary(&self) -> OrchestrationSummary {
        let record = self.record.read();
        OrchestrationSummary {
            id: self.id,
            name: self.name.clone(),
            status: record.status,
            paused: self.scope.is_paused(),
            current_stage: self.current_stage_name(record.current_stage),
            stage_count: self.stages.len(),
            progress: self.progress(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrchestrationOptions, StageType, Task};

    fn handle() -> OrchestrationHandle {
        let stage = Stage::new("build", StageType::Parallel, vec![Task::new("deploy", "api")]);
        OrchestrationHandle::new(
            "release".into(),
            vec![stage],
            vec![None],
            None,
            ExecutionScope::new(Uuid::new_v4(), OrchestrationOptions::default()),
        )
    }

    #[test]
    fn test_terminal_orchestration_is_immutable() {
        let handle = handle();
        handle.transition(OrchestrationState::Executing).unwrap();
        handle.fail("boom", Some("build".into()), None).unwrap();

        assert!(handle.transition(OrchestrationState::Completed).is_err());
        handle.record_failure("later", None, None);
        handle.set_stage_status(0, StageStatus::Completed);

        let report = handle.report();
        assert_eq!(report.status, OrchestrationState::Failed);
        assert_eq!(report.error.as_deref(), Some("boom"));
        assert_eq!(report.stages[0].status, StageStatus::Pending);
        assert!(report.completed_at.is_some());
    }

    #[test]
    fn test_run_can_be_claimed_once() {
        let handle = handle();
        assert!(handle.claim_run());
        assert!(!handle.claim_run());
    }

    #[test]
    fn test_report_counts_unstarted_tasks() {
        let report = handle().report();
        assert_eq!(report.progress.total, 1);
        assert_eq!(report.progress.pending, 1);
        assert!(report.results.is_empty());
    }
}
