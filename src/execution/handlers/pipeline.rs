//! `trigger-pipeline` handler
//!
//! Triggers a run on the external CI/CD system and polls it to completion.
//! When the trigger call itself fails (or no trigger is configured, or the
//! orchestration runs in fallback configuration) the task completes with a
//! locally simulated result flagged `"degraded": true` and the reason, so one
//! unreachable CI API does not abort a whole batch. Once a run has been
//! triggered, a failed poll or a non-success conclusion fails the task.

use super::{TaskExecutionContext, TaskHandler};
use crate::collaborators::PipelineTrigger;
use crate::config::PipelineConfig;
use crate::models::Task;
use anyhow::bail;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PipelineHandler {
    trigger: Option<Arc<dyn PipelineTrigger>>,
    config: PipelineConfig,
}

impl PipelineHandler {
    pub fn new(trigger: Option<Arc<dyn PipelineTrigger>>, config: PipelineConfig) -> Self {
        Self { trigger, config }
    }

    fn degraded(task: &Task, repository: &str, workflow_ref: &str, reason: &str) -> Value {
        json!({
            "simulated": true,
            "degraded": true,
            "reason": reason,
            "task_id": task.id,
            "repository": repository,
            "workflow_ref": workflow_ref,
            "conclusion": "success",
        })
    }
}

#[async_trait]
impl TaskHandler for PipelineHandler {
    async fn handle(&self, task: &Task, context: &TaskExecutionContext) -> anyhow::Result<Value> {
        let repository = match task
            .repository
            .as_deref()
            .or_else(|| task.payload.get("repository").and_then(Value::as_str))
        {
            Some(repository) => repository.to_string(),
            None => bail!("Task '{}' has no repository to trigger a pipeline for", task.id),
        };
        let workflow_ref = task
            .payload
            .get("workflow")
            .and_then(Value::as_str)
            .unwrap_or(&self.config.default_workflow_ref)
            .to_string();

        let trigger = match (&self.trigger, context.fallback_configuration) {
            (_, true) => {
                return Ok(Self::degraded(
                    task,
                    &repository,
                    &workflow_ref,
                    "fallback configuration active",
                ))
            }
            (None, false) => {
                return Ok(Self::degraded(
                    task,
                    &repository,
                    &workflow_ref,
                    "no pipeline trigger configured",
                ))
            }
            (Some(trigger), false) => trigger,
        };

        let handle = match trigger.trigger_external_run(&repository, &workflow_ref).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(
                    task_id = %task.id,
                    repository = %repository,
                    error = %err,
                    "⚠️ Pipeline trigger failed, completing with degraded result"
                );
                return Ok(Self::degraded(task, &repository, &workflow_ref, &err.to_string()));
            }
        };
        info!(task_id = %task.id, run_id = %handle.run_id, "🚀 External pipeline run triggered");

        for poll in 1..=self.config.max_polls {
            let status = trigger.poll_run_status(&handle).await?;
            if status.completed {
                let conclusion = status.conclusion.unwrap_or_else(|| "unknown".to_string());
                if conclusion != "success" {
                    bail!("Pipeline run {} concluded with '{}'", handle.run_id, conclusion);
                }
                return Ok(json!({
                    "run_id": handle.run_id,
                    "repository": handle.repository,
                    "workflow_ref": handle.workflow_ref,
                    "conclusion": conclusion,
                    "polls": poll,
                }));
            }
            if context.is_cancelled() {
                bail!(
                    "Orchestration cancelled while waiting for pipeline run {}",
                    handle.run_id
                );
            }
            debug!(run_id = %handle.run_id, poll = poll, "Pipeline run still in progress");
            tokio::time::sleep(self.config.poll_interval()).await;
        }

        bail!(
            "Pipeline run {} timeout after {} polls",
            handle.run_id,
            self.config.max_polls
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CollaboratorError, RunHandle, RunStatus};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use uuid::Uuid;

    struct ScriptedTrigger {
        trigger_error: Option<String>,
        poll_error: Option<String>,
        statuses: Mutex<VecDeque<RunStatus>>,
    }

    #[async_trait]
    impl PipelineTrigger for ScriptedTrigger {
        async fn trigger_external_run(
            &self,
            repository: &str,
            workflow_ref: &str,
        ) -> Result<RunHandle, CollaboratorError> {
            if let Some(message) = &self.trigger_error {
                return Err(CollaboratorError::PipelineTrigger {
                    repository: repository.to_string(),
                    message: message.clone(),
                });
            }
            Ok(RunHandle {
                run_id: "run-1".into(),
                repository: repository.into(),
                workflow_ref: workflow_ref.into(),
            })
        }

        async fn poll_run_status(&self, handle: &RunHandle) -> Result<RunStatus, CollaboratorError> {
            if let Some(message) = &self.poll_error {
                return Err(CollaboratorError::PipelinePoll {
                    run_id: handle.run_id.clone(),
                    message: message.clone(),
                });
            }
            Ok(self.statuses.lock().pop_front().unwrap_or(RunStatus {
                completed: false,
                conclusion: None,
            }))
        }
    }

    fn handler(trigger: ScriptedTrigger, max_polls: u32) -> PipelineHandler {
        PipelineHandler::new(
            Some(Arc::new(trigger)),
            PipelineConfig {
                poll_interval_ms: 0,
                max_polls,
                default_workflow_ref: "deploy.yml".into(),
            },
        )
    }

    fn context(fallback: bool) -> TaskExecutionContext {
        TaskExecutionContext::new(Uuid::new_v4(), "s", 1, fallback, Arc::new(AtomicBool::new(false)))
    }

    fn completed(conclusion: &str) -> RunStatus {
        RunStatus {
            completed: true,
            conclusion: Some(conclusion.into()),
        }
    }

    #[tokio::test]
    async fn test_polls_until_success() {
        let trigger = ScriptedTrigger {
            trigger_error: None,
            poll_error: None,
            statuses: Mutex::new(VecDeque::from([
                RunStatus { completed: false, conclusion: None },
                completed("success"),
            ])),
        };
        let task = Task::new("trigger-pipeline", "api");

        let value = handler(trigger, 5).handle(&task, &context(false)).await.unwrap();
        assert_eq!(value["polls"], 2);
        assert_eq!(value["workflow_ref"], "deploy.yml");
        assert!(value.get("degraded").is_none());
    }

    #[tokio::test]
    async fn test_trigger_failure_degrades_observably() {
        let trigger = ScriptedTrigger {
            trigger_error: Some("503 from CI".into()),
            poll_error: None,
            statuses: Mutex::new(VecDeque::new()),
        };
        let task = Task::new("trigger-pipeline", "api");

        let value = handler(trigger, 5).handle(&task, &context(false)).await.unwrap();
        assert_eq!(value["degraded"], true);
        assert!(value["reason"].as_str().unwrap().contains("503 from CI"));
    }

    #[tokio::test]
    async fn test_poll_error_after_trigger_fails_task() {
        let trigger = ScriptedTrigger {
            trigger_error: None,
            poll_error: Some("connection reset".into()),
            statuses: Mutex::new(VecDeque::new()),
        };
        let task = Task::new("trigger-pipeline", "api");

        let err = handler(trigger, 5).handle(&task, &context(false)).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_failed_conclusion_fails_task() {
        let trigger = ScriptedTrigger {
            trigger_error: None,
            poll_error: None,
            statuses: Mutex::new(VecDeque::from([completed("failure")])),
        };
        let task = Task::new("trigger-pipeline", "api");

        let err = handler(trigger, 5).handle(&task, &context(false)).await.unwrap_err();
        assert!(err.to_string().contains("failure"));
    }

    #[tokio::test]
    async fn test_exhausted_polls_report_timeout() {
        let trigger = ScriptedTrigger {
            trigger_error: None,
            poll_error: None,
            statuses: Mutex::new(VecDeque::new()),
        };
        let task = Task::new("trigger-pipeline", "api");

        let err = handler(trigger, 3).handle(&task, &context(false)).await.unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn test_fallback_configuration_skips_trigger() {
        let trigger = ScriptedTrigger {
            trigger_error: Some("unreachable".into()),
            poll_error: None,
            statuses: Mutex::new(VecDeque::new()),
        };
        let task = Task::new("trigger-pipeline", "api");

        let value = handler(trigger, 1).handle(&task, &context(true)).await.unwrap();
        assert_eq!(value["reason"], "fallback configuration active");
    }
}
