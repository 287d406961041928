//! # Orchestration Service
//!
//! The entry point for callers. A service is constructed explicitly through
//! [`OrchestrationServiceBuilder`], owns the planner, the execution engine
//! (and with it the global concurrency budget), the recovery service and the
//! registry of orchestrations, and is shut down explicitly.
//!
//! ## Run loop
//!
//! For each stage, in order:
//!
//! 1. execute the stage with its strategy
//! 2. route every failed task through task-level recovery
//! 3. if all task recoveries held, re-execute the stage so tasks blocked by
//!    the failures get to run (succeeded tasks are not re-run); tasks that
//!    fail on this re-run go back to step 2
//! 4. if the stage still failed, route it through stage-level recovery
//! 5. a stage that is still failed fails the orchestration, or is recorded
//!    and skipped past when `continue_on_error` is set
//!
//! A failed orchestration with `rollback_on_failure` set then dispatches a
//! `rollback` task for every repository with a succeeded task, one parallel
//! stage per original stage, latest stage first. Rollback results live in
//! their own result store and never enter recovery.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fleet_conductor::models::{TaskType, WorkOrder};
//! use fleet_conductor::orchestration::OrchestrationService;
//! use std::collections::HashMap;
//!
//! # tokio_test::block_on(async {
//! let service = OrchestrationService::builder().build().unwrap();
//!
//! let order = WorkOrder::for_repositories(
//!     "release-42",
//!     vec!["infra".into(), "api".into(), "web".into()],
//!     HashMap::from([
//!         ("api".to_string(), vec!["infra".to_string()]),
//!         ("web".to_string(), vec!["api".to_string()]),
//!     ]),
//!     vec![TaskType::Deploy],
//! );
//! let id = service.submit(order).await.unwrap();
//! let report = service.run(id).await.unwrap();
//! println!("{} finished {}", report.name, report.status);
//!
//! service.shutdown().await;
//! # });
//! ```

use super::handle::OrchestrationHandle;
use super::recovery_actions::OrchestrationRecoveryActions;
use super::status::{
    FailureReport, OrchestrationStatusReport, OrchestrationSummary, RollbackReport, RollbackStatus,
    StageStatus,
};
use crate::collaborators::{DependencySource, PipelineTrigger, SharedResourceManager};
use crate::config::{ConfigManager, OrchestratorConfig};
use crate::error::{OrchestratorError, Result};
use crate::events::{EventPublisher, LifecycleEvent, LifecycleObserver};
use crate::execution::handlers::HandlerRegistry;
use crate::execution::{ConcurrencyStats, ExecutionScope, StageOutcome, TaskExecutionEngine, TaskHandler};
use crate::graph::{DependencyGraph, DependencyGraphAnalyzer};
use crate::logging::log_orchestration_operation;
use crate::models::{Stage, StageType, Task, TaskType, WorkOrder, WorkOrderSource};
use crate::planning::{ExecutionPlan, PhasePlanner, PlanningError};
use crate::recovery::{
    FailureContext, FailureRecoveryService, RecoveryPolicy, RecoveryRecord, RecoveryStatistics,
};
use crate::state_machine::{OrchestrationState, TaskState};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

enum StageResult {
    Succeeded(StageOutcome),
    Failed {
        error: String,
        failed_task: Option<String>,
        failed: usize,
    },
    /// Cancelled, or made terminal from outside while running
    Interrupted,
}

struct ServiceInner {
    config: OrchestratorConfig,
    planner: PhasePlanner,
    engine: TaskExecutionEngine,
    recovery: FailureRecoveryService,
    events: EventPublisher,
    dependency_source: Option<Arc<dyn DependencySource>>,
    resource_manager: Option<Arc<dyn SharedResourceManager>>,
    orchestrations: DashMap<Uuid, Arc<OrchestrationHandle>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

#[derive(Clone)]
pub struct OrchestrationService {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for OrchestrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationService")
            .field("orchestrations", &self.inner.orchestrations.len())
            .field("concurrency", &self.inner.engine.limiter().stats())
            .field("shut_down", &self.inner.shut_down.load(Ordering::SeqCst))
            .finish()
    }
}

impl OrchestrationService {
    pub fn builder() -> OrchestrationServiceBuilder {
        OrchestrationServiceBuilder::new()
    }

    /// Service with built-in handlers and no collaborators
    pub fn from_config_manager(manager: &ConfigManager) -> Result<Self> {
        Self::builder().with_config(manager.config().clone()).build()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventPublisher {
        &self.inner.events
    }

    pub fn planner(&self) -> &PhasePlanner {
        &self.inner.planner
    }

    pub fn engine(&self) -> &TaskExecutionEngine {
        &self.inner.engine
    }

    pub fn recovery(&self) -> &FailureRecoveryService {
        &self.inner.recovery
    }

    pub fn concurrency_stats(&self) -> ConcurrencyStats {
        self.inner.engine.limiter().stats()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(OrchestratorError::ShutDown);
        }
        Ok(())
    }

    fn handle(&self, id: Uuid) -> Result<Arc<OrchestrationHandle>> {
        self.inner
            .orchestrations
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(OrchestratorError::OrchestrationNotFound(id))
    }

    /// Validate and plan a work order; the orchestration stays in `planning`
    ///
    /// Validation errors and dependency cycles are returned here and never
    /// reach recovery.
    #[instrument(skip(self, order), fields(work_order = %order.name))]
    pub async fn submit(&self, order: WorkOrder) -> Result<Uuid> {
        self.ensure_running()?;
        let WorkOrder {
            name,
            source,
            options,
        } = order;
        let parallel_enabled = options
            .parallel_enabled
            .unwrap_or(self.inner.config.planning.parallel_enabled);

        let (stages, plan) = match source {
            WorkOrderSource::Stages { stages } => {
                if stages.is_empty() {
                    return Err(OrchestratorError::validation(format!(
                        "Work order '{name}' has no stages"
                    )));
                }
                let stages = stages
                    .into_iter()
                    .enumerate()
                    .map(|(position, spec)| spec.into_stage(position))
                    .collect::<Result<Vec<_>>>()?;
                (stages, None)
            }
            WorkOrderSource::Repositories {
                repositories,
                dependencies,
                task_types,
            } => {
                let (stages, plan) = self
                    .plan_repositories(&name, &repositories, dependencies, &task_types, parallel_enabled)
                    .await?;
                (stages, Some(plan))
            }
        };

        Self::ensure_unique_stage_names(&stages)?;
        Self::ensure_unique_task_ids(&stages)?;
        let analyses = stages
            .iter()
            .map(|stage| self.inner.planner.analyze_stage(stage))
            .collect::<std::result::Result<Vec<_>, PlanningError>>()?;

        let id = Uuid::new_v4();
        let stage_count = stages.len();
        let task_count: usize = stages.iter().map(|stage| stage.tasks.len()).sum();
        let handle = OrchestrationHandle::new(
            name,
            stages,
            analyses,
            plan,
            ExecutionScope::new(id, options),
        );
        self.inner.orchestrations.insert(id, Arc::new(handle));

        log_orchestration_operation(
            "submit",
            id,
            "planning",
            Some(&format!("stages={stage_count} tasks={task_count}")),
        );
        Ok(id)
    }

    async fn plan_repositories(
        &self,
        name: &str,
        repositories: &[String],
        dependencies: std::collections::HashMap<String, Vec<String>>,
        task_types: &[TaskType],
        parallel_enabled: bool,
    ) -> Result<(Vec<Stage>, ExecutionPlan)> {
        if repositories.is_empty() {
            return Err(OrchestratorError::validation(format!(
                "Work order '{name}' names no repositories"
            )));
        }

        let graph = match (&self.inner.dependency_source, dependencies.is_empty()) {
            (Some(source), true) => DependencyGraph::from_source(repositories, source.as_ref()).await?,
            _ => DependencyGraph::from_pairs(repositories.iter().map(|repository| {
                (
                    repository.clone(),
                    dependencies.get(repository).cloned().unwrap_or_default(),
                )
            })),
        };

        let plan = self.inner.planner.plan(repositories, &graph, parallel_enabled)?;
        let stages = self.inner.planner.plan_repository_stages(&plan, task_types)?;
        Ok((stages, plan))
    }

    /// Stages are addressed by name in failure reports
    fn ensure_unique_stage_names(stages: &[Stage]) -> Result<()> {
        let mut seen = HashSet::new();
        for stage in stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(OrchestratorError::validation(format!(
                    "Duplicate stage name '{}' in work order",
                    stage.name
                )));
            }
        }
        Ok(())
    }

    fn ensure_unique_task_ids(stages: &[Stage]) -> Result<()> {
        let mut seen = HashSet::new();
        for task in stages.iter().flat_map(|stage| stage.tasks.iter()) {
            if !seen.insert(task.id.as_str()) {
                return Err(OrchestratorError::validation(format!(
                    "Duplicate task id '{}' in work order",
                    task.id
                )));
            }
        }
        Ok(())
    }

    /// Execute a submitted orchestration to a terminal state
    pub async fn run(&self, id: Uuid) -> Result<OrchestrationStatusReport> {
        self.ensure_running()?;
        let handle = self.handle(id)?;
        if !handle.claim_run() {
            return Err(OrchestratorError::validation(format!(
                "Orchestration {id} has already been started"
            )));
        }
        Ok(self.drive(handle).await)
    }

    /// Submit and run in one call
    pub async fn execute(&self, order: WorkOrder) -> Result<OrchestrationStatusReport> {
        let id = self.submit(order).await?;
        self.run(id).await
    }

    /// Submit and run in the background; poll the returned id for status
    pub async fn start(&self, order: WorkOrder) -> Result<Uuid> {
        let id = self.submit(order).await?;
        let handle = self.handle(id)?;
        if !handle.claim_run() {
            return Err(OrchestratorError::validation(format!(
                "Orchestration {id} has already been started"
            )));
        }

        let service = self.clone();
        let task = tokio::spawn(async move {
            service.drive(handle).await;
        });

        let mut background = self.inner.background.lock();
        background.retain(|task| !task.is_finished());
        background.push(task);
        Ok(id)
    }

    #[instrument(skip(self, handle), fields(orchestration_id = %handle.id()))]
    async fn drive(&self, handle: Arc<OrchestrationHandle>) -> OrchestrationStatusReport {
        if let Err(err) = handle.transition(OrchestrationState::Executing) {
            warn!(error = %err, "Orchestration not started");
            return handle.report();
        }

        let id = handle.id();
        let started = Instant::now();
        self.inner.events.publish(LifecycleEvent::OrchestrationStarted {
            orchestration_id: id,
            name: handle.name().to_string(),
            stage_count: handle.stages().len(),
        });
        log_orchestration_operation("run", id, "executing", Some(handle.name()));

        let continue_on_error = handle.scope().options().continue_on_error;
        let mut any_failed = false;

        for (index, stage) in handle.stages().iter().enumerate() {
            if handle.scope().is_cancelled() || handle.is_terminal() {
                break;
            }

            handle.set_stage_status(index, StageStatus::Running);
            self.inner.events.publish(LifecycleEvent::StageStarted {
                orchestration_id: id,
                stage: stage.name.clone(),
                task_count: stage.tasks.len(),
            });

            match self.run_stage(&handle, index).await {
                StageResult::Succeeded(outcome) => {
                    let counts = outcome.counts();
                    handle.set_stage_status(index, StageStatus::Completed);
                    self.inner.events.publish(LifecycleEvent::StageCompleted {
                        orchestration_id: id,
                        stage: stage.name.clone(),
                        succeeded: counts.succeeded + counts.skipped,
                    });
                }
                StageResult::Interrupted => {
                    handle.set_stage_status(index, StageStatus::Cancelled);
                    break;
                }
                StageResult::Failed {
                    error,
                    failed_task,
                    failed,
                } => {
                    any_failed = true;
                    error!(stage = %stage.name, error = %error, "❌ Stage failed after recovery");
                    handle.set_stage_status(index, StageStatus::Failed);
                    handle.record_failure(error.clone(), Some(stage.name.clone()), failed_task);
                    self.inner.events.publish(LifecycleEvent::StageFailed {
                        orchestration_id: id,
                        stage: stage.name.clone(),
                        failed,
                        error,
                    });
                    if !continue_on_error {
                        break;
                    }
                }
            }
        }

        if any_failed
            && handle.scope().options().rollback_on_failure
            && !handle.scope().is_cancelled()
            && !handle.is_terminal()
        {
            self.roll_back(&handle).await;
        }

        self.finalize(&handle, any_failed, started);
        handle.report()
    }

    /// Dispatch `rollback` tasks for repositories that already succeeded
    ///
    /// Each repository is rolled back once, with the latest stage it succeeded
    /// in. The failed stage's own successes are included.
    #[instrument(skip(self, handle), fields(orchestration_id = %handle.id()))]
    async fn roll_back(&self, handle: &Arc<OrchestrationHandle>) {
        let id = handle.id();
        let results = handle.scope().results();
        let mut claimed: HashSet<String> = HashSet::new();

        let stages: Vec<Stage> = handle
            .stages()
            .iter()
            .rev()
            .filter_map(|stage| {
                let tasks: Vec<Task> = stage
                    .tasks
                    .iter()
                    .rev()
                    .filter(|task| results.status(&task.id) == Some(TaskState::Succeeded))
                    .filter_map(|task| task.repository.clone())
                    .filter(|repository| claimed.insert(repository.clone()))
                    .map(|repository| {
                        Task::new(TaskType::Rollback, repository)
                            .with_payload(json!({ "stage": stage.name }))
                    })
                    .collect();
                (!tasks.is_empty()).then(|| {
                    Stage::new(format!("rollback:{}", stage.name), StageType::Parallel, tasks)
                })
            })
            .collect();

        let repositories: Vec<String> = stages
            .iter()
            .flat_map(|stage| stage.tasks.iter())
            .filter_map(|task| task.repository.clone())
            .collect();
        if repositories.is_empty() {
            info!("Nothing to roll back");
            return;
        }

        warn!(repositories = repositories.len(), "↩️ Rolling back orchestration");
        self.inner.events.publish(LifecycleEvent::RollbackStarted {
            orchestration_id: id,
            repositories: repositories.clone(),
        });

        let started_at = chrono::Utc::now();
        let scope = handle.scope().child();
        for stage in &stages {
            self.inner.engine.execute_stage(&scope, stage, None).await;
        }

        let results = scope.results().snapshot();
        let failed = results
            .iter()
            .filter(|entry| entry.status != TaskState::Succeeded)
            .count();
        let status = if failed == 0 {
            RollbackStatus::Completed
        } else {
            RollbackStatus::Partial
        };

        handle.set_rollback(RollbackReport {
            status,
            repositories: repositories.clone(),
            results,
            started_at,
            completed_at: chrono::Utc::now(),
        });
        self.inner.events.publish(LifecycleEvent::RollbackCompleted {
            orchestration_id: id,
            rolled_back: repositories.len() - failed,
            failed,
        });
        log_orchestration_operation(
            "rollback",
            id,
            &status.to_string(),
            Some(&format!("repositories={} failed={failed}", repositories.len())),
        );
    }

    async fn run_stage(&self, handle: &Arc<OrchestrationHandle>, index: usize) -> StageResult {
        let stage = &handle.stages()[index];
        let scope = handle.scope();
        let engine = &self.inner.engine;
        let interrupted = || scope.is_cancelled() || handle.is_terminal();

        let mut outcome = engine.execute_stage(scope, stage, handle.analysis(index)).await;
        if outcome.is_success() {
            return StageResult::Succeeded(outcome);
        }
        if interrupted() {
            return StageResult::Interrupted;
        }

        let actions = self.recovery_actions(handle, Some(index));

        // Each task gets one task-level recovery; tasks unblocked by a
        // recovery and failing on the re-run get theirs in the next round.
        let mut attempted: HashSet<String> = HashSet::new();
        let mut unrecovered: Option<(String, String)> = None;
        loop {
            let failed: Vec<(String, String)> = outcome
                .failed_tasks()
                .filter(|task| !attempted.contains(&task.task_id))
                .map(|task| (task.task_id.clone(), task.error.clone().unwrap_or_default()))
                .collect();
            if failed.is_empty() {
                break;
            }

            for (task_id, error) in failed {
                attempted.insert(task_id.clone());
                let context = FailureContext::task(handle.id(), &stage.name, &task_id, &error);
                let record = self.inner.recovery.recover(&context, &actions).await;
                handle.push_recovery(record.id);
                if interrupted() {
                    return StageResult::Interrupted;
                }
                if !record.is_success() && unrecovered.is_none() {
                    unrecovered = Some((task_id, error));
                }
            }
            if unrecovered.is_some() {
                break;
            }

            outcome = engine.execute_stage(scope, stage, handle.analysis(index)).await;
            if outcome.is_success() {
                return StageResult::Succeeded(outcome);
            }
            if interrupted() {
                return StageResult::Interrupted;
            }
        }

        let (failed_task, error) = match unrecovered {
            Some((task_id, error)) => (Some(task_id), error),
            None => {
                let first = outcome.failed_tasks().chain(outcome.blocked_tasks()).next();
                (
                    first.map(|task| task.task_id.clone()),
                    outcome
                        .first_error()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Stage '{}' did not complete", stage.name)),
                )
            }
        };
        let failing: Vec<String> = outcome
            .failed_tasks()
            .chain(outcome.blocked_tasks())
            .map(|task| task.task_id.clone())
            .collect();

        let context = FailureContext::stage(handle.id(), &stage.name, failing.clone(), &error);
        let record = self.inner.recovery.recover(&context, &actions).await;
        handle.push_recovery(record.id);
        if interrupted() {
            return StageResult::Interrupted;
        }
        if record.is_success() {
            let outcome = engine.execute_stage(scope, stage, handle.analysis(index)).await;
            return StageResult::Succeeded(outcome);
        }

        StageResult::Failed {
            error,
            failed_task,
            failed: failing.len(),
        }
    }

    fn recovery_actions(
        &self,
        handle: &Arc<OrchestrationHandle>,
        stage_index: Option<usize>,
    ) -> OrchestrationRecoveryActions {
        OrchestrationRecoveryActions::new(
            self.inner.engine.clone(),
            Arc::clone(handle),
            stage_index,
            self.inner.resource_manager.clone(),
        )
    }

    fn finalize(&self, handle: &OrchestrationHandle, any_failed: bool, started: Instant) {
        if handle.is_terminal() {
            return;
        }

        let id = handle.id();
        let duration_ms = started.elapsed().as_millis() as u64;
        let (next, event) = if handle.scope().is_cancelled() {
            (
                OrchestrationState::Cancelled,
                LifecycleEvent::OrchestrationCancelled { orchestration_id: id },
            )
        } else if any_failed {
            (
                OrchestrationState::Failed,
                LifecycleEvent::OrchestrationFailed {
                    orchestration_id: id,
                    error: handle
                        .error()
                        .unwrap_or_else(|| "one or more stages failed".to_string()),
                },
            )
        } else {
            (
                OrchestrationState::Completed,
                LifecycleEvent::OrchestrationCompleted {
                    orchestration_id: id,
                    duration_ms,
                },
            )
        };

        match handle.transition(next) {
            Ok(()) => {
                self.inner.events.publish(event);
                log_orchestration_operation(
                    "run",
                    id,
                    &next.to_string(),
                    Some(&format!("duration_ms={duration_ms}")),
                );
                info!(orchestration_id = %id, status = %next, duration_ms = duration_ms, "✅ Orchestration finished");
            }
            Err(err) => warn!(orchestration_id = %id, error = %err, "Orchestration final state not recorded"),
        }
    }

    pub fn get_orchestration_status(&self, id: Uuid) -> Result<OrchestrationStatusReport> {
        Ok(self.handle(id)?.report())
    }

    /// Orchestrations not yet in a terminal state, oldest first
    pub fn list_active_orchestrations(&self) -> Vec<OrchestrationSummary> {
        let mut active: Vec<_> = self
            .inner
            .orchestrations
            .iter()
            .filter(|entry| !entry.value().is_terminal())
            .map(|entry| entry.value().summary())
            .collect();
        active.sort_by_key(|summary| summary.created_at);
        active
    }

    /// Every known orchestration, oldest first
    pub fn list_orchestrations(&self) -> Vec<OrchestrationSummary> {
        let mut all: Vec<_> = self
            .inner
            .orchestrations
            .iter()
            .map(|entry| entry.value().summary())
            .collect();
        all.sort_by_key(|summary| summary.created_at);
        all
    }

    /// Stop new tasks from starting
    ///
    /// A planned orchestration becomes `cancelled` immediately. An executing
    /// one becomes `cancelled` once its in-flight tasks have finished.
    pub fn cancel_orchestration(&self, id: Uuid) -> Result<()> {
        let handle = self.handle(id)?;
        let status = handle.status();
        if status.is_terminal() {
            return Err(OrchestratorError::invalid_transition(
                format!("orchestration {id}"),
                status,
                OrchestrationState::Cancelled,
            ));
        }

        handle.scope().cancel();
        if status == OrchestrationState::Planning && handle.transition(OrchestrationState::Cancelled).is_ok() {
            self.inner
                .events
                .publish(LifecycleEvent::OrchestrationCancelled { orchestration_id: id });
        }
        log_orchestration_operation("cancel", id, "cancel_requested", None);
        Ok(())
    }

    /// Hold back tasks of an orchestration that have not started yet
    ///
    /// Running tasks finish normally. Pausing is in-memory only.
    pub fn pause_orchestration(&self, id: Uuid) -> Result<()> {
        let handle = self.handle(id)?;
        let status = handle.status();
        if status.is_terminal() {
            return Err(OrchestratorError::invalid_transition(
                format!("orchestration {id}"),
                status,
                "paused",
            ));
        }

        if handle.scope().pause() {
            self.inner
                .events
                .publish(LifecycleEvent::OrchestrationPaused { orchestration_id: id });
            log_orchestration_operation("pause", id, "paused", None);
        }
        Ok(())
    }

    /// Let a paused orchestration start tasks again
    pub fn resume_orchestration(&self, id: Uuid) -> Result<()> {
        let handle = self.handle(id)?;
        let status = handle.status();
        if status.is_terminal() {
            return Err(OrchestratorError::invalid_transition(
                format!("orchestration {id}"),
                status,
                "resumed",
            ));
        }

        if handle.scope().resume() {
            self.inner
                .events
                .publish(LifecycleEvent::OrchestrationResumed { orchestration_id: id });
            log_orchestration_operation("resume", id, "resumed", None);
        }
        Ok(())
    }

    /// Drop a finished orchestration and its results; returns its final report
    pub fn forget_orchestration(&self, id: Uuid) -> Result<OrchestrationStatusReport> {
        let handle = self.handle(id)?;
        let status = handle.status();
        if !status.is_terminal() {
            return Err(OrchestratorError::validation(format!(
                "Orchestration {id} is {status} and cannot be forgotten until it finishes"
            )));
        }

        let report = handle.report();
        self.inner.orchestrations.remove(&id);
        log_orchestration_operation("forget", id, &status.to_string(), None);
        Ok(report)
    }

    /// Drop every finished orchestration; returns how many were removed
    pub fn forget_finished_orchestrations(&self) -> usize {
        let before = self.inner.orchestrations.len();
        self.inner
            .orchestrations
            .retain(|_, handle| !handle.is_terminal());
        let removed = before.saturating_sub(self.inner.orchestrations.len());
        if removed > 0 {
            info!(removed = removed, "🧹 Forgot finished orchestrations");
        }
        removed
    }

    /// Route an externally detected failure (e.g. a watchdog timeout)
    /// through classification and recovery
    ///
    /// If recovery fails, the orchestration is failed with the reported error.
    #[instrument(skip(self, report), fields(orchestration_id = %id, scope = %report.scope))]
    pub async fn report_failure(&self, id: Uuid, report: FailureReport) -> Result<RecoveryRecord> {
        let handle = self.handle(id)?;
        let status = handle.status();
        if status.is_terminal() {
            return Err(OrchestratorError::invalid_transition(
                format!("orchestration {id}"),
                status,
                "recovering",
            ));
        }

        let stage_index = match &report.stage {
            Some(name) => Some(
                handle
                    .stages()
                    .iter()
                    .position(|stage| &stage.name == name)
                    .ok_or_else(|| {
                        OrchestratorError::validation(format!("Unknown stage '{name}'"))
                    })?,
            ),
            None => handle.current_stage_index(),
        };
        let stage_name = stage_index.map(|index| handle.stages()[index].name.clone());

        let context = FailureContext {
            scope: report.scope,
            orchestration_id: Some(id),
            stage: stage_name.clone(),
            task_ids: report.task_ids.clone(),
            error: report.error.clone(),
            failure_type: report.failure_type.clone(),
        };
        let actions = self.recovery_actions(&handle, stage_index);
        let record = self.inner.recovery.recover(&context, &actions).await;
        handle.push_recovery(record.id);

        if !record.is_success() {
            handle.scope().cancel();
            if handle
                .fail(report.error.clone(), stage_name, report.task_ids.first().cloned())
                .is_ok()
            {
                self.inner.events.publish(LifecycleEvent::OrchestrationFailed {
                    orchestration_id: id,
                    error: report.error.clone(),
                });
                log_orchestration_operation("report_failure", id, "failed", Some(&report.error));
            }
        } else if handle.scope().is_cancelled()
            && handle.status() == OrchestrationState::Planning
            && handle.transition(OrchestrationState::Cancelled).is_ok()
        {
            self.inner
                .events
                .publish(LifecycleEvent::OrchestrationCancelled { orchestration_id: id });
        }

        Ok(record)
    }

    pub fn register_policy(&self, failure_type: impl Into<String>, policy: RecoveryPolicy) {
        self.inner.recovery.register_policy(failure_type, policy);
    }

    pub fn recovery_statistics(&self, recent_limit: usize) -> RecoveryStatistics {
        self.inner.recovery.statistics(recent_limit)
    }

    /// Cancel everything still active, wait for background runs, and close
    /// the concurrency budget
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(orchestrations = self.inner.orchestrations.len(), "🛑 Orchestration service shutting down");

        let active: Vec<Uuid> = self
            .inner
            .orchestrations
            .iter()
            .filter(|entry| !entry.value().is_terminal())
            .map(|entry| *entry.key())
            .collect();
        for id in active {
            if let Err(err) = self.cancel_orchestration(id) {
                warn!(orchestration_id = %id, error = %err, "Orchestration not cancelled during shutdown");
            }
        }

        let background = std::mem::take(&mut *self.inner.background.lock());
        for joined in join_all(background).await {
            if let Err(err) = joined {
                error!(error = %err, "Background orchestration run did not complete cleanly");
            }
        }

        self.inner.engine.limiter().close();
        info!("🛑 Orchestration service stopped");
    }
}

/// Assembles an [`OrchestrationService`]
#[derive(Default)]
pub struct OrchestrationServiceBuilder {
    config: OrchestratorConfig,
    handlers: Vec<(TaskType, Arc<dyn TaskHandler>)>,
    fallback_handler: Option<Arc<dyn TaskHandler>>,
    pipeline_trigger: Option<Arc<dyn PipelineTrigger>>,
    dependency_source: Option<Arc<dyn DependencySource>>,
    resource_manager: Option<Arc<dyn SharedResourceManager>>,
    events: Option<EventPublisher>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl OrchestrationServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the handler for one task type
    pub fn with_handler(mut self, task_type: impl Into<TaskType>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.push((task_type.into(), handler));
        self
    }

    /// Replace the script fallback used for custom task types
    pub fn with_fallback_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.fallback_handler = Some(handler);
        self
    }

    pub fn with_pipeline_trigger(mut self, trigger: Arc<dyn PipelineTrigger>) -> Self {
        self.pipeline_trigger = Some(trigger);
        self
    }

    /// Used to discover dependencies for repository work orders without a map
    pub fn with_dependency_source(mut self, source: Arc<dyn DependencySource>) -> Self {
        self.dependency_source = Some(source);
        self
    }

    pub fn with_resource_manager(mut self, manager: Arc<dyn SharedResourceManager>) -> Self {
        self.resource_manager = Some(manager);
        self
    }

    pub fn with_event_publisher(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Result<OrchestrationService> {
        self.config.validate()?;
        let config = self.config;

        let events = self
            .events
            .unwrap_or_else(|| EventPublisher::new(config.events.channel_capacity));
        for observer in self.observers {
            events.add_observer(observer);
        }

        let registry = HandlerRegistry::with_builtins(
            config.pipeline.clone(),
            self.pipeline_trigger,
            self.dependency_source.clone(),
            DependencyGraphAnalyzer::from_config(&config.planning),
        );
        for (task_type, handler) in self.handlers {
            registry.register(task_type, handler);
        }
        if let Some(fallback) = self.fallback_handler {
            registry.set_fallback(fallback);
        }

        let engine = TaskExecutionEngine::new(config.execution.clone(), Arc::new(registry), events.clone());
        let recovery = FailureRecoveryService::new(&config.recovery, events.clone());
        let planner = PhasePlanner::new(config.planning.clone());

        info!(
            concurrency_limit = config.execution.concurrency_limit,
            recovery_policies = recovery.failure_types().len(),
            "🚀 Orchestration service ready"
        );

        Ok(OrchestrationService {
            inner: Arc::new(ServiceInner {
                config,
                planner,
                engine,
                recovery,
                events,
                dependency_source: self.dependency_source,
                resource_manager: self.resource_manager,
                orchestrations: DashMap::new(),
                background: Mutex::new(Vec::new()),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}
