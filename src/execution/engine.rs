//! # Task Execution Engine
//!
//! Executes one stage at a time for an orchestration. Every task start goes
//! through the shared [`ConcurrencyLimiter`], so the running-task bound holds
//! across strategies and across orchestrations.
//!
//! Per task: skip if it already succeeded (or was skipped) in an earlier
//! attempt, settle as `cancelled` if the orchestration was cancelled, hold
//! back while it is paused, wait for a slot, re-check cancellation, then
//! `running` → `succeeded | failed` with a `task:started` and a terminal
//! event. Handler panics are recorded as failures. In a dry run the handler
//! is not called and the task succeeds with a `"dry_run": true` result.

use super::concurrency::ConcurrencyLimiter;
use super::handlers::{HandlerRegistry, TaskExecutionContext};
use super::results::{TaskCounts, TaskResultEntry};
use super::scope::ExecutionScope;
use super::ExecutionStrategy;
use crate::config::ExecutionConfig;
use crate::events::{EventPublisher, LifecycleEvent};
use crate::graph::DependencyAnalysis;
use crate::logging::log_task_operation;
use crate::models::{Stage, Task};
use crate::state_machine::TaskState;
use anyhow::anyhow;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Final state of one task after a stage run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskState,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub duration_ms: Option<u64>,
}

impl TaskOutcome {
    fn pending(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskState::Queued,
            result: None,
            error: None,
            attempts: 0,
            duration_ms: None,
        }
    }
}

impl From<TaskResultEntry> for TaskOutcome {
    fn from(entry: TaskResultEntry) -> Self {
        let duration_ms = entry.duration_ms();
        Self {
            task_id: entry.task_id,
            status: entry.status,
            result: entry.result,
            error: entry.error,
            attempts: entry.attempts,
            duration_ms,
        }
    }
}

/// Aggregate result of one stage run, tasks in stage order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: String,
    pub strategy: ExecutionStrategy,
    pub tasks: Vec<TaskOutcome>,
    pub duration_ms: u64,
}

impl StageOutcome {
    /// Every task succeeded or was skipped
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|task| task.status.satisfies_dependencies())
    }

    pub fn counts(&self) -> TaskCounts {
        self.tasks.iter().map(|task| task.status).collect()
    }

    pub fn failure_count(&self) -> usize {
        self.failed_tasks().count()
    }

    /// Tasks that ran and failed
    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.tasks.iter().filter(|task| task.status == TaskState::Failed)
    }

    /// Tasks that never started because of an upstream failure
    pub fn blocked_tasks(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.tasks.iter().filter(|task| task.status == TaskState::Blocked)
    }

    pub fn was_cancelled(&self) -> bool {
        self.tasks.iter().any(|task| task.status == TaskState::Cancelled)
    }

    /// First task error in stage order
    pub fn first_error(&self) -> Option<&str> {
        self.failed_tasks()
            .chain(self.blocked_tasks())
            .find_map(|task| task.error.as_deref())
    }
}

#[derive(Clone)]
pub struct TaskExecutionEngine {
    config: ExecutionConfig,
    handlers: Arc<HandlerRegistry>,
    limiter: Arc<ConcurrencyLimiter>,
    events: EventPublisher,
}

impl std::fmt::Debug for TaskExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutionEngine")
            .field("config", &self.config)
            .field("limiter", &self.limiter.stats())
            .finish()
    }
}

impl TaskExecutionEngine {
    pub fn new(config: ExecutionConfig, handlers: Arc<HandlerRegistry>, events: EventPublisher) -> Self {
        let limiter = ConcurrencyLimiter::new(config.concurrency_limit);
        Self {
            config,
            handlers,
            limiter,
            events,
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.limiter
    }

    /// Run every task of `stage` with its effective strategy
    ///
    /// Never short-circuits on a task failure except where the strategy
    /// says so (sequential, and dependents of a failed dependency). The
    /// outcome reflects the result store after the run.
    #[instrument(skip(self, scope, stage, analysis), fields(
        orchestration_id = %scope.orchestration_id(),
        stage = %stage.name,
        tasks = stage.tasks.len()
    ))]
    pub async fn execute_stage(
        &self,
        scope: &ExecutionScope,
        stage: &Stage,
        analysis: Option<&DependencyAnalysis>,
    ) -> StageOutcome {
        let started = Instant::now();
        let strategy = stage.effective_strategy();
        let tasks: Vec<Arc<Task>> = stage.tasks.iter().cloned().map(Arc::new).collect();
        scope
            .results()
            .register(&stage.name, tasks.iter().map(|task| task.id.as_str()));

        debug!(strategy = %strategy, "Executing stage");
        match strategy {
            ExecutionStrategy::Parallel => {
                self.run_parallel(scope, &stage.name, tasks.clone()).await;
            }
            ExecutionStrategy::Sequential => {
                self.run_sequential(scope, &stage.name, &tasks).await;
            }
            ExecutionStrategy::DependencyOrdered => match analysis {
                Some(analysis) => self.run_dependency_ordered(scope, &stage.name, &tasks, analysis).await,
                None => {
                    debug!("No dependency analysis available, degrading to sequential");
                    self.run_sequential(scope, &stage.name, &tasks).await;
                }
            },
            ExecutionStrategy::Batch => self.run_batches(scope, &stage.name, &tasks).await,
            ExecutionStrategy::Pipeline => self.run_pipeline(scope, &stage.name, &tasks).await,
        }

        let outcome = StageOutcome {
            stage: stage.name.clone(),
            strategy,
            tasks: tasks
                .iter()
                .map(|task| {
                    scope
                        .results()
                        .get(&task.id)
                        .map(TaskOutcome::from)
                        .unwrap_or_else(|| TaskOutcome::pending(&task.id))
                })
                .collect(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        let counts = outcome.counts();
        info!(
            strategy = %strategy,
            succeeded = counts.succeeded,
            failed = counts.failed,
            blocked = counts.blocked,
            cancelled = counts.cancelled,
            skipped = counts.skipped,
            duration_ms = outcome.duration_ms,
            "🏁 Stage execution finished"
        );
        outcome
    }

    /// Fan out and join; no ordering among siblings
    async fn run_parallel(&self, scope: &ExecutionScope, stage: &str, tasks: Vec<Arc<Task>>) {
        let handles: Vec<_> = tasks
            .iter()
            .map(|task| {
                let engine = self.clone();
                let scope = scope.clone();
                let stage = stage.to_string();
                let task = Arc::clone(task);
                tokio::spawn(async move { engine.run_task(&scope, &stage, &task).await })
            })
            .collect();

        for (task, joined) in tasks.iter().zip(join_all(handles).await) {
            if let Err(join_error) = joined {
                error!(task_id = %task.id, error = %join_error, "Task worker did not complete");
                self.settle_failed(scope, task, &format!("task worker aborted: {join_error}"));
            }
        }
    }

    /// List order, fail-fast; tasks after a failure are settled as blocked
    async fn run_sequential(&self, scope: &ExecutionScope, stage: &str, tasks: &[Arc<Task>]) {
        let mut halted_by: Option<(String, TaskState)> = None;

        for task in tasks {
            if let Some((failed_task, status)) = &halted_by {
                let (state, reason) = match status {
                    TaskState::Cancelled => (TaskState::Cancelled, "orchestration cancelled".to_string()),
                    _ => (
                        TaskState::Blocked,
                        format!("Sequential stage halted after task '{failed_task}' failed"),
                    ),
                };
                scope.results().settle(&task.id, state, reason);
                continue;
            }

            let status = self.run_task(scope, stage, task).await;
            if !status.satisfies_dependencies() {
                halted_by = Some((task.id.clone(), status));
            }
        }
    }

    /// Replay analysis groups in order; a group runs in parallel
    async fn run_dependency_ordered(
        &self,
        scope: &ExecutionScope,
        stage: &str,
        tasks: &[Arc<Task>],
        analysis: &DependencyAnalysis,
    ) {
        let by_id: HashMap<&str, &Arc<Task>> =
            tasks.iter().map(|task| (task.id.as_str(), task)).collect();
        let continue_past = scope.options().continue_past_failed_dependencies;

        for group in &analysis.parallel_groups {
            let mut runnable = Vec::with_capacity(group.len());
            for task_id in group {
                let Some(task) = by_id.get(task_id.as_str()) else {
                    continue;
                };
                let unmet = task.depends_on.iter().find(|dependency| {
                    by_id.contains_key(dependency.as_str())
                        && !scope
                            .results()
                            .status(dependency)
                            .is_some_and(|status| status.satisfies_dependencies())
                });

                match unmet {
                    Some(dependency) if !continue_past => {
                        debug!(task_id = %task.id, dependency = %dependency, "Dependency not satisfied, blocking task");
                        scope.results().settle(
                            &task.id,
                            TaskState::Blocked,
                            format!("Blocked by unsatisfied dependency '{dependency}'"),
                        );
                    }
                    _ => runnable.push(Arc::clone(task)),
                }
            }

            if !runnable.is_empty() {
                self.run_parallel(scope, stage, runnable).await;
            }
        }
    }

    async fn run_batches(&self, scope: &ExecutionScope, stage: &str, tasks: &[Arc<Task>]) {
        let batch_size = self.config.batch_size.max(1);
        let batch_count = tasks.len().div_ceil(batch_size);

        for (index, batch) in tasks.chunks(batch_size).enumerate() {
            debug!(batch = index + 1, of = batch_count, size = batch.len(), "Running batch");
            self.run_parallel(scope, stage, batch.to_vec()).await;

            let delay = self.config.batch_delay();
            if index + 1 < batch_count && !delay.is_zero() && !scope.is_cancelled() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Sliding window of at most `pipeline_concurrency` in-flight tasks
    async fn run_pipeline(&self, scope: &ExecutionScope, stage: &str, tasks: &[Arc<Task>]) {
        let window = self.config.pipeline_concurrency.max(1);
        let mut queue = tasks.iter();
        let mut in_flight = JoinSet::new();
        let mut launched = 0;
        let mut worker_error: Option<String> = None;

        loop {
            while in_flight.len() < window {
                let Some(task) = queue.next() else { break };
                let engine = self.clone();
                let scope = scope.clone();
                let stage = stage.to_string();
                let task = Arc::clone(task);
                in_flight.spawn(async move { engine.run_task(&scope, &stage, &task).await });
                launched += 1;
            }

            match in_flight.join_next().await {
                Some(Ok(_)) => {}
                Some(Err(join_error)) => {
                    error!(error = %join_error, "Pipeline task worker did not complete");
                    worker_error = Some(format!("task worker aborted: {join_error}"));
                }
                None => break,
            }
        }

        // The join set does not say which task a failed worker carried; every
        // worker has finished here, so anything still running was abandoned
        if let Some(message) = worker_error {
            self.settle_abandoned(scope, &tasks[..launched], &message);
        }
    }

    /// Fail every task that is still `running` after its worker has gone away
    fn settle_abandoned(&self, scope: &ExecutionScope, tasks: &[Arc<Task>], message: &str) {
        for task in tasks {
            self.settle_failed(scope, task, message);
        }
    }

    /// Execute one task with full bookkeeping; returns its resulting state
    pub async fn run_task(&self, scope: &ExecutionScope, stage: &str, task: &Task) -> TaskState {
        let results = scope.results();

        if let Some(status) = results.status(&task.id) {
            if status.satisfies_dependencies() {
                debug!(task_id = %task.id, status = %status, "Task already resolved, not re-running");
                return status;
            }
        }

        if scope.is_cancelled() {
            results.settle(&task.id, TaskState::Cancelled, "orchestration cancelled");
            return TaskState::Cancelled;
        }

        if scope.is_paused() {
            debug!(task_id = %task.id, "Orchestration paused, holding task back");
            scope.wait_while_paused().await;
        }

        let Some(_permit) = self.limiter.acquire().await else {
            results.settle(&task.id, TaskState::Cancelled, "execution slots closed");
            return TaskState::Cancelled;
        };

        // Cancellation may have happened while waiting for the slot
        if scope.is_cancelled() {
            results.settle(&task.id, TaskState::Cancelled, "orchestration cancelled");
            return TaskState::Cancelled;
        }

        let attempt = match results.start(&task.id, stage) {
            Ok(attempt) => attempt,
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "Task could not be started");
                return results.status(&task.id).unwrap_or(TaskState::Failed);
            }
        };

        let orchestration_id = scope.orchestration_id();
        self.events.publish(LifecycleEvent::TaskStarted {
            orchestration_id,
            task_id: task.id.clone(),
            task_type: task.task_type.to_string(),
            attempt,
        });
        log_task_operation(
            "execute",
            orchestration_id,
            &task.id,
            "started",
            Some(&format!("attempt={attempt}")),
        );

        let overrides = scope.overrides();
        let context = TaskExecutionContext::new(
            orchestration_id,
            stage,
            attempt,
            overrides.fallback_configuration,
            scope.cancellation_flag(),
        );
        let timeout = self
            .config
            .task_timeout()
            .map(|timeout| timeout.mul_f64(overrides.timeout_multiplier.max(1.0)));

        let started = Instant::now();
        let outcome = if scope.options().dry_run {
            Ok(Self::dry_run_result(task, attempt))
        } else {
            self.invoke(task, &context, timeout).await
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                if let Err(err) = results.succeed(&task.id, value) {
                    warn!(task_id = %task.id, error = %err, "Could not record task success");
                }
                self.events.publish(LifecycleEvent::TaskCompleted {
                    orchestration_id,
                    task_id: task.id.clone(),
                    duration_ms,
                });
                log_task_operation("execute", orchestration_id, &task.id, "succeeded", None);
                TaskState::Succeeded
            }
            Err(err) => {
                let message = format!("{err:#}");
                if let Err(record_err) = results.fail(&task.id, message.clone()) {
                    warn!(task_id = %task.id, error = %record_err, "Could not record task failure");
                }
                self.events.publish(LifecycleEvent::TaskFailed {
                    orchestration_id,
                    task_id: task.id.clone(),
                    error: message.clone(),
                });
                log_task_operation("execute", orchestration_id, &task.id, "failed", Some(&message));
                TaskState::Failed
            }
        }
    }

    /// What a dry run records in place of the handler's result
    fn dry_run_result(task: &Task, attempt: u32) -> Value {
        json!({
            "dry_run": true,
            "task_id": task.id,
            "task_type": task.task_type.as_str(),
            "repository": task.repository,
            "attempt": attempt,
        })
    }

    async fn invoke(
        &self,
        task: &Task,
        context: &TaskExecutionContext,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Value> {
        let Some(handler) = self.handlers.resolve(&task.task_type) else {
            return Err(anyhow!(
                "No handler registered for task type '{}'",
                task.task_type
            ));
        };

        let work = AssertUnwindSafe(handler.handle(task, context)).catch_unwind();
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(anyhow!(
                        "Task '{}' timeout after {}ms",
                        task.id,
                        limit.as_millis()
                    ))
                }
            },
            None => work.await,
        };

        joined.unwrap_or_else(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow!("Task handler panicked: {reason}"))
        })
    }

    fn settle_failed(&self, scope: &ExecutionScope, task: &Task, message: &str) {
        if scope.results().status(&task.id) == Some(TaskState::Running)
            && scope.results().fail(&task.id, message).is_ok()
        {
            self.events.publish(LifecycleEvent::TaskFailed {
                orchestration_id: scope.orchestration_id(),
                task_id: task.id.clone(),
                error: message.to_string(),
            });
        }
    }
}
