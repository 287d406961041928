//! Recovery strategies applied to a running orchestration
//!
//! Most strategies adjust the execution scope (timeouts, fallback mode,
//! resource claims) and then re-execute the failed targets; succeeded tasks
//! are never re-run. Verification re-reads the result store rather than
//! trusting the strategy: a task-level recovery holds when every failed task
//! now succeeded or was skipped, a stage-level one when the whole stage did.

use super::handle::OrchestrationHandle;
use crate::collaborators::SharedResourceManager;
use crate::execution::TaskExecutionEngine;
use crate::models::Stage;
use crate::recovery::{FailureContext, FailureScope, RecoveryActions, RecoveryStrategyKind};
use crate::state_machine::TaskState;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

const TIMEOUT_EXTENSION_FACTOR: f64 = 2.0;

pub(crate) struct OrchestrationRecoveryActions {
    engine: TaskExecutionEngine,
    handle: Arc<OrchestrationHandle>,
    stage_index: Option<usize>,
    resource_manager: Option<Arc<dyn SharedResourceManager>>,
}

impl OrchestrationRecoveryActions {
    pub(crate) fn new(
        engine: TaskExecutionEngine,
        handle: Arc<OrchestrationHandle>,
        stage_index: Option<usize>,
        resource_manager: Option<Arc<dyn SharedResourceManager>>,
    ) -> Self {
        Self {
            engine,
            handle,
            stage_index,
            resource_manager,
        }
    }

    fn stage(&self) -> Option<&Stage> {
        self.stage_index.and_then(|index| self.handle.stages().get(index))
    }

    /// Task ids the recovery is about; the whole stage when none were named
    fn targets(&self, context: &FailureContext) -> Vec<String> {
        if !context.task_ids.is_empty() {
            return context.task_ids.clone();
        }
        self.stage()
            .map(|stage| stage.tasks.iter().map(|task| task.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Re-execute the failed targets
    async fn rerun(&self, context: &FailureContext) -> anyhow::Result<()> {
        let index = self
            .stage_index
            .ok_or_else(|| anyhow!("no stage is executing, nothing to re-run"))?;
        let stage = self
            .stage()
            .ok_or_else(|| anyhow!("stage index {index} out of range"))?;
        let scope = self.handle.scope();

        match context.scope {
            FailureScope::Task => {
                for task_id in &context.task_ids {
                    let task = stage
                        .task(task_id)
                        .with_context(|| format!("task '{task_id}' is not part of stage '{}'", stage.name))?;
                    self.engine.run_task(scope, &stage.name, task).await;
                }
            }
            FailureScope::Stage | FailureScope::Orchestration => {
                self.engine
                    .execute_stage(scope, stage, self.handle.analysis(index))
                    .await;
            }
        }
        Ok(())
    }

    async fn rerun_with_claims(
        &self,
        strategy: RecoveryStrategyKind,
        context: &FailureContext,
    ) -> anyhow::Result<()> {
        let Some(manager) = &self.resource_manager else {
            return self.rerun(context).await;
        };

        let owner = self.handle.id().to_string();
        let resources = self.resources(context);
        let mut claims = Vec::with_capacity(resources.len());
        for resource in resources {
            match manager.claim(&resource, &owner, strategy.as_str()).await {
                Ok(claim_id) => claims.push((resource, claim_id)),
                Err(err) => {
                    self.release(manager.as_ref(), &claims).await;
                    return Err(err.into());
                }
            }
        }
        debug!(claims = claims.len(), strategy = %strategy, "Shared resources claimed for recovery");

        let outcome = self.rerun(context).await;
        self.release(manager.as_ref(), &claims).await;
        outcome
    }

    /// One capacity resource per affected repository (or task id)
    fn resources(&self, context: &FailureContext) -> Vec<String> {
        let mut resources: Vec<String> = self
            .targets(context)
            .iter()
            .map(|task_id| {
                self.stage()
                    .and_then(|stage| stage.task(task_id))
                    .and_then(|task| task.repository.clone())
                    .unwrap_or_else(|| task_id.clone())
            })
            .map(|target| format!("capacity:{target}"))
            .collect();
        resources.sort();
        resources.dedup();
        resources
    }

    async fn release(&self, manager: &dyn SharedResourceManager, claims: &[(String, String)]) {
        for (resource, claim_id) in claims {
            if let Err(err) = manager.release(resource, claim_id).await {
                warn!(resource = %resource, error = %err, "Failed to release shared resource claim");
            }
        }
    }

    fn skip(&self, context: &FailureContext) -> anyhow::Result<()> {
        let results = self.handle.scope().results();
        let mut skipped = 0;
        for task_id in self.targets(context) {
            if results
                .status(&task_id)
                .is_some_and(|status| status.is_failure())
                && results.settle(&task_id, TaskState::Skipped, "skipped by recovery")
            {
                skipped += 1;
            }
        }
        info!(orchestration_id = %self.handle.id(), skipped = skipped, "⏭️ Failed tasks skipped by recovery");
        Ok(())
    }
}

#[async_trait]
impl RecoveryActions for OrchestrationRecoveryActions {
    async fn execute(
        &self,
        strategy: RecoveryStrategyKind,
        context: &FailureContext,
    ) -> anyhow::Result<()> {
        let scope = self.handle.scope();
        if scope.is_cancelled() && !strategy.is_terminating() {
            return Err(anyhow!("orchestration was cancelled"));
        }

        match strategy {
            RecoveryStrategyKind::Cancel | RecoveryStrategyKind::GracefulShutdown => {
                scope.cancel();
                Ok(())
            }
            RecoveryStrategyKind::SkipTask => self.skip(context),
            RecoveryStrategyKind::TimeoutExtension => {
                scope.update_overrides(|overrides| {
                    overrides.timeout_multiplier *= TIMEOUT_EXTENSION_FACTOR;
                });
                self.rerun(context).await
            }
            RecoveryStrategyKind::FallbackConfiguration => {
                scope.update_overrides(|overrides| overrides.fallback_configuration = true);
                self.rerun(context).await
            }
            RecoveryStrategyKind::ResourceScaling | RecoveryStrategyKind::DependencyIsolation => {
                self.rerun_with_claims(strategy, context).await
            }
            RecoveryStrategyKind::RetryWithBackoff
            | RecoveryStrategyKind::ResourceOptimization
            | RecoveryStrategyKind::LoadBalancing
            | RecoveryStrategyKind::MemoryCleanup
            | RecoveryStrategyKind::DiskCleanup => self.rerun(context).await,
        }
    }

    async fn verify(
        &self,
        strategy: RecoveryStrategyKind,
        context: &FailureContext,
    ) -> anyhow::Result<bool> {
        if strategy.is_terminating() {
            return Ok(self.handle.scope().is_cancelled());
        }

        let results = self.handle.scope().results();
        let targets = match context.scope {
            FailureScope::Task => context.task_ids.clone(),
            FailureScope::Stage | FailureScope::Orchestration => self
                .stage()
                .map(|stage| stage.tasks.iter().map(|task| task.id.clone()).collect())
                .unwrap_or_else(|| context.task_ids.clone()),
        };

        Ok(targets.iter().all(|task_id| {
            results
                .status(task_id)
                .is_some_and(|status| status.satisfies_dependencies())
        }))
    }
}
