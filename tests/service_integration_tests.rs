mod common;

use common::{
    deploy, failing_on, fast_config, stage, wait_for_terminal, FlakyHandler, RecordingTrigger,
    TrackingHandler,
};
use fleet_conductor::events::{EventRecorder, LifecycleEvent, LifecycleObserver, PublishedEvent};
use fleet_conductor::execution::handlers::handler_fn;
use fleet_conductor::models::{OrchestrationOptions, StageType, Task, TaskType, WorkOrder};
use fleet_conductor::orchestration::{RollbackStatus, StageStatus};
use fleet_conductor::{
    FailureReport, FailureScope, OrchestrationService, OrchestrationState, OrchestratorError,
    TaskState,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn service_with(handler: Arc<dyn fleet_conductor::TaskHandler>) -> (OrchestrationService, Arc<EventRecorder>) {
    let recorder = EventRecorder::new();
    let service = OrchestrationService::builder()
        .with_config(fast_config())
        .with_handler("deploy", handler)
        .with_observer(recorder.clone())
        .build()
        .unwrap();
    (service, recorder)
}

fn three_tier() -> WorkOrder {
    WorkOrder::for_repositories(
        "release-42",
        vec!["infra".into(), "api".into(), "web".into()],
        HashMap::from([
            ("api".to_string(), vec!["infra".to_string()]),
            ("web".to_string(), vec!["api".to_string()]),
        ]),
        vec![TaskType::Deploy],
    )
}

#[tokio::test]
async fn test_repository_release_completes_in_dependency_order() {
    let tracker = TrackingHandler::new(Duration::from_millis(1));
    let (service, recorder) = service_with(tracker.clone());

    let report = service.execute(three_tier()).await.unwrap();

    assert_eq!(report.status, OrchestrationState::Completed);
    assert_eq!(
        tracker.started(),
        vec!["deploy-infra", "deploy-api", "deploy-web"]
    );
    assert!(report.stages.iter().all(|s| s.status == StageStatus::Completed));
    assert_eq!(report.progress.succeeded, 3);
    assert!((report.progress.percentage - 100.0).abs() < f64::EPSILON);
    assert!(report.error.is_none());
    assert!(report.completed_at.is_some());

    let names = recorder.names();
    assert_eq!(names.first(), Some(&"orchestration:started"));
    assert_eq!(names.last(), Some(&"orchestration:completed"));
    assert_eq!(recorder.count("stage:started"), 3);
    assert_eq!(recorder.count("stage:completed"), 3);
    assert_eq!(recorder.count("task:completed"), 3);
    assert!(service.list_active_orchestrations().is_empty());
}

#[tokio::test]
async fn test_transient_task_failure_is_recovered_by_retry() {
    let flaky = FlakyHandler::new(1);
    let (service, _recorder) = service_with(flaky.clone());

    let order = WorkOrder::from_stages(
        "flaky",
        vec![stage("rollout", StageType::Parallel, vec![deploy("api"), deploy("web")])],
    );
    let report = service.execute(order).await.unwrap();

    assert_eq!(report.status, OrchestrationState::Completed);
    assert_eq!(flaky.calls("deploy-api"), 2);
    assert_eq!(report.result("deploy-api").map(|r| r.attempts), Some(2));
    assert_eq!(report.recoveries.len(), 2);

    let stats = service.recovery_statistics(10);
    assert_eq!(stats.total, 2);
    assert_eq!(stats.completed, 2);
}

#[tokio::test]
async fn test_escalation_to_fallback_configuration_recovers_task() {
    let handler = handler_fn(|task, ctx| async move {
        if ctx.fallback_configuration {
            Ok(json!({ "task": task.id, "mode": "fallback" }))
        } else {
            anyhow::bail!("primary registry rejected {}", task.id)
        }
    });
    let (service, _recorder) = service_with(handler);

    let order = WorkOrder::from_stages(
        "fallback",
        vec![stage("rollout", StageType::Sequential, vec![deploy("api"), deploy("web")])],
    );
    let report = service.execute(order).await.unwrap();

    assert_eq!(report.status, OrchestrationState::Completed);
    let record = service
        .recovery()
        .history()
        .recent(1)
        .into_iter()
        .next()
        .unwrap();
    assert!(record.escalated);
    assert_eq!(record.attempts.len(), 3);
    assert_eq!(record.attempts[0].delay_ms, 0);
    assert_eq!(record.attempts[1].delay_ms, 2);
    assert_eq!(
        record.resolved_by(),
        Some(fleet_conductor::RecoveryStrategyKind::FallbackConfiguration)
    );
    assert_eq!(report.result("deploy-web").map(|r| r.status), Some(TaskState::Succeeded));
}

#[tokio::test]
async fn test_unrecoverable_stage_fails_orchestration() {
    let (service, recorder) = service_with(failing_on(&["deploy-api"]));

    let order = WorkOrder::from_stages(
        "broken",
        vec![
            stage("build", StageType::Parallel, vec![deploy("api"), deploy("worker")]),
            stage("publish", StageType::Parallel, vec![deploy("web")]),
        ],
    );
    let report = service.execute(order).await.unwrap();

    assert_eq!(report.status, OrchestrationState::Failed);
    assert_eq!(report.error.as_deref(), Some("deploy of deploy-api failed"));
    assert_eq!(report.failed_stage.as_deref(), Some("build"));
    assert_eq!(report.failed_task.as_deref(), Some("deploy-api"));
    assert_eq!(report.stages[0].status, StageStatus::Failed);
    assert_eq!(report.stages[1].status, StageStatus::Pending);
    assert_eq!(report.result("deploy-worker").map(|r| r.status), Some(TaskState::Succeeded));
    assert!(report.result("deploy-web").is_none());

    let names = recorder.names();
    let tail = &names[names.len() - 2..];
    assert_eq!(tail, ["stage:failed", "orchestration:failed"]);
    assert_eq!(service.recovery_statistics(10).failed, 2);
}

#[tokio::test]
async fn test_continue_on_error_runs_remaining_stages() {
    let (service, _recorder) = service_with(failing_on(&["deploy-api"]));

    let order = WorkOrder::from_stages(
        "best-effort",
        vec![
            stage("build", StageType::Parallel, vec![deploy("api")]),
            stage("publish", StageType::Parallel, vec![deploy("web")]),
        ],
    )
    .with_options(OrchestrationOptions {
        continue_on_error: true,
        ..OrchestrationOptions::default()
    });
    let report = service.execute(order).await.unwrap();

    assert_eq!(report.status, OrchestrationState::Failed);
    assert_eq!(report.stages[0].status, StageStatus::Failed);
    assert_eq!(report.stages[1].status, StageStatus::Completed);
    assert_eq!(report.result("deploy-web").map(|r| r.status), Some(TaskState::Succeeded));
    assert_eq!(report.failed_stage.as_deref(), Some("build"));
}

#[tokio::test]
async fn test_cancel_stops_new_tasks() {
    let tracker = TrackingHandler::new(Duration::from_millis(50));
    let (service, recorder) = service_with(tracker.clone());

    let tasks: Vec<Task> = (1..=6).map(|n| deploy(&format!("svc{n}"))).collect();
    let order = WorkOrder::from_stages("long", vec![stage("rollout", StageType::Sequential, tasks)]);
    let id = service.start(order).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    service.cancel_orchestration(id).unwrap();
    let report = wait_for_terminal(&service, id).await;

    assert_eq!(report.status, OrchestrationState::Cancelled);
    assert!(tracker.started().len() < 6);
    assert!(report
        .results
        .iter()
        .any(|entry| entry.status == TaskState::Cancelled));
    assert_eq!(recorder.count("orchestration:cancelled"), 1);

    let err = service.cancel_orchestration(id).unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn test_cancel_before_run_is_immediate() {
    let (service, _recorder) = service_with(failing_on(&[]));
    let id = service.submit(three_tier()).await.unwrap();

    service.cancel_orchestration(id).unwrap();
    assert_eq!(
        service.get_orchestration_status(id).unwrap().status,
        OrchestrationState::Cancelled
    );

    let report = service.run(id).await.unwrap();
    assert_eq!(report.status, OrchestrationState::Cancelled);
    assert!(report.results.is_empty());
}

#[tokio::test]
async fn test_orchestration_cannot_run_twice() {
    let (service, _recorder) = service_with(failing_on(&[]));
    let id = service.submit(three_tier()).await.unwrap();

    service.run(id).await.unwrap();
    assert!(matches!(
        service.run(id).await,
        Err(OrchestratorError::Validation { .. })
    ));
}

#[tokio::test]
async fn test_reported_timeout_shuts_orchestration_down() {
    let (service, _recorder) = service_with(failing_on(&[]));
    let id = service.submit(three_tier()).await.unwrap();

    let record = service
        .report_failure(
            id,
            FailureReport::new(FailureScope::Orchestration, "deployment window timed out"),
        )
        .await
        .unwrap();

    assert!(record.is_success());
    assert_eq!(record.failure_type, "orchestration:timeout");
    let report = service.get_orchestration_status(id).unwrap();
    assert_eq!(report.status, OrchestrationState::Cancelled);
    assert_eq!(report.recoveries, vec![record.id]);
}

#[tokio::test]
async fn test_reported_failure_without_policy_fails_orchestration() {
    let (service, recorder) = service_with(failing_on(&[]));
    let id = service.submit(three_tier()).await.unwrap();

    let record = service
        .report_failure(
            id,
            FailureReport::new(FailureScope::Task, "permission denied for deploy key")
                .for_tasks(vec!["deploy-api".into()]),
        )
        .await
        .unwrap();

    assert!(!record.is_success());
    assert_eq!(record.failure_type, "task:permission_denied");
    let report = service.get_orchestration_status(id).unwrap();
    assert_eq!(report.status, OrchestrationState::Failed);
    assert_eq!(report.error.as_deref(), Some("permission denied for deploy key"));
    assert_eq!(report.failed_task.as_deref(), Some("deploy-api"));
    assert_eq!(recorder.count("orchestration:failed"), 1);

    assert!(service
        .report_failure(id, FailureReport::new(FailureScope::Task, "again"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_pipeline_tasks_trigger_external_runs() {
    let trigger = RecordingTrigger::new("success");
    let service = OrchestrationService::builder()
        .with_config(fast_config())
        .with_pipeline_trigger(trigger.clone())
        .build()
        .unwrap();

    let order = WorkOrder::for_repositories(
        "ci",
        vec!["svcA".into(), "svcB".into()],
        HashMap::new(),
        vec![TaskType::TriggerPipeline],
    );
    let report = service.execute(order).await.unwrap();

    assert_eq!(report.status, OrchestrationState::Completed);
    let mut triggered = trigger.triggered();
    triggered.sort();
    assert_eq!(triggered, vec!["svcA", "svcB"]);
}

#[tokio::test]
async fn test_shutdown_cancels_background_runs_and_rejects_new_work() {
    let tracker = TrackingHandler::new(Duration::from_millis(30));
    let (service, _recorder) = service_with(tracker);

    let tasks: Vec<Task> = (1..=5).map(|n| deploy(&format!("svc{n}"))).collect();
    let order = WorkOrder::from_stages("long", vec![stage("rollout", StageType::Sequential, tasks)]);
    let id = service.start(order).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    service.shutdown().await;

    let report = service.get_orchestration_status(id).unwrap();
    assert_eq!(report.status, OrchestrationState::Cancelled);
    assert!(service.engine().limiter().is_closed());
    assert!(matches!(
        service.submit(three_tier()).await,
        Err(OrchestratorError::ShutDown)
    ));
}

#[tokio::test]
async fn test_concurrency_budget_holds_across_concurrent_orchestrations() {
    let tracker = TrackingHandler::new(Duration::from_millis(10));
    let mut config = fast_config();
    config.execution.concurrency_limit = 2;
    let service = OrchestrationService::builder()
        .with_config(config)
        .with_handler("deploy", tracker.clone())
        .build()
        .unwrap();

    let order = |name: &str| {
        let tasks: Vec<Task> = (1..=4).map(|n| deploy(&format!("{name}{n}"))).collect();
        WorkOrder::from_stages(name, vec![stage("fan-out", StageType::Parallel, tasks)])
    };
    let (left, right) = tokio::join!(service.execute(order("a")), service.execute(order("b")));

    assert_eq!(left.unwrap().status, OrchestrationState::Completed);
    assert_eq!(right.unwrap().status, OrchestrationState::Completed);
    assert!(tracker.peak() <= 2);
    assert!(service.concurrency_stats().peak <= 2);
}

fn with_rollback(order: WorkOrder) -> WorkOrder {
    order.with_options(OrchestrationOptions {
        rollback_on_failure: true,
        ..OrchestrationOptions::default()
    })
}

#[tokio::test]
async fn test_failed_orchestration_rolls_back_succeeded_repositories() {
    let (service, recorder) = service_with(failing_on(&["deploy-web"]));
    let order = with_rollback(WorkOrder::from_stages(
        "guarded",
        vec![
            stage("foundation", StageType::Parallel, vec![deploy("infra"), deploy("api")]),
            stage("edge", StageType::Parallel, vec![deploy("docs"), deploy("web")]),
        ],
    ));

    let report = service.execute(order).await.unwrap();

    assert_eq!(report.status, OrchestrationState::Failed);
    assert_eq!(report.failed_stage.as_deref(), Some("edge"));
    let rollback = report.rollback.clone().expect("rollback recorded");
    assert_eq!(rollback.status, RollbackStatus::Completed);
    assert_eq!(rollback.repositories, vec!["docs", "api", "infra"]);
    assert_eq!(rollback.results.len(), 3);
    assert!(rollback
        .results
        .iter()
        .all(|entry| entry.status == TaskState::Succeeded));

    // Rollback results are kept apart from the forward run
    assert_eq!(
        report.result("deploy-infra").map(|r| r.status),
        Some(TaskState::Succeeded)
    );
    assert!(report.result("rollback-infra").is_none());

    let milestones: Vec<_> = recorder
        .names()
        .into_iter()
        .filter(|name| name.starts_with("rollback:") || name.starts_with("orchestration:"))
        .collect();
    assert_eq!(
        milestones,
        vec![
            "orchestration:started",
            "rollback:started",
            "rollback:completed",
            "orchestration:failed"
        ]
    );
}

#[tokio::test]
async fn test_failing_rollback_is_reported_as_partial() {
    let service = OrchestrationService::builder()
        .with_config(fast_config())
        .with_handler("deploy", failing_on(&["deploy-web"]))
        .with_handler(TaskType::Rollback, failing_on(&["rollback-api"]))
        .build()
        .unwrap();
    let order = with_rollback(WorkOrder::from_stages(
        "guarded",
        vec![
            stage("foundation", StageType::Parallel, vec![deploy("infra"), deploy("api")]),
            stage("edge", StageType::Parallel, vec![deploy("web")]),
        ],
    ));

    let report = service.execute(order).await.unwrap();

    assert_eq!(report.status, OrchestrationState::Failed);
    let rollback = report.rollback.expect("rollback recorded");
    assert_eq!(rollback.status, RollbackStatus::Partial);
    let failed: Vec<_> = rollback
        .results
        .iter()
        .filter(|entry| entry.status == TaskState::Failed)
        .map(|entry| entry.task_id.as_str())
        .collect();
    assert_eq!(failed, vec!["rollback-api"]);
}

#[tokio::test]
async fn test_failure_without_rollback_option_dispatches_nothing() {
    let (service, recorder) = service_with(failing_on(&["deploy-api"]));
    let report = service.execute(three_tier()).await.unwrap();

    assert_eq!(report.status, OrchestrationState::Failed);
    assert!(report.rollback.is_none());
    assert_eq!(recorder.count("rollback:started"), 0);
}

#[tokio::test]
async fn test_dry_run_walks_stages_without_dispatching() {
    let (service, recorder) = service_with(failing_on(&["deploy-infra", "deploy-api", "deploy-web"]));
    let order = three_tier().with_options(OrchestrationOptions {
        dry_run: true,
        ..OrchestrationOptions::default()
    });

    let report = service.execute(order).await.unwrap();

    assert_eq!(report.status, OrchestrationState::Completed);
    assert!(report.dry_run);
    assert!(report.plan.is_some());
    assert_eq!(report.results.len(), 3);
    for entry in &report.results {
        assert_eq!(entry.result.as_ref().unwrap()["dry_run"], true);
    }
    assert_eq!(recorder.count("task:completed"), 3);
    assert_eq!(recorder.count("recovery:completed"), 0);
}

/// Pauses the orchestration the first time a stage starts
#[derive(Default)]
struct PauseOnFirstStage {
    service: OnceLock<OrchestrationService>,
    fired: AtomicBool,
}

impl LifecycleObserver for PauseOnFirstStage {
    fn on_event(&self, event: &PublishedEvent) {
        if let LifecycleEvent::StageStarted { orchestration_id, .. } = &event.event {
            if !self.fired.swap(true, Ordering::SeqCst) {
                if let Some(service) = self.service.get() {
                    service.pause_orchestration(*orchestration_id).unwrap();
                }
            }
        }
    }
}

#[tokio::test]
async fn test_observer_can_pause_and_caller_resumes() {
    let pauser = Arc::new(PauseOnFirstStage::default());
    let recorder = EventRecorder::new();
    let service = OrchestrationService::builder()
        .with_config(fast_config())
        .with_observer(pauser.clone())
        .with_observer(recorder.clone())
        .build()
        .unwrap();
    pauser.service.set(service.clone()).unwrap();

    let id = service.start(three_tier()).await.unwrap();
    for _ in 0..200 {
        if service.get_orchestration_status(id).unwrap().paused {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(30)).await;

    let held = service.get_orchestration_status(id).unwrap();
    assert!(held.paused);
    assert_eq!(held.status, OrchestrationState::Executing);
    assert_eq!(held.progress.succeeded, 0);
    assert!(service.list_active_orchestrations()[0].paused);

    service.resume_orchestration(id).unwrap();
    let report = wait_for_terminal(&service, id).await;

    assert_eq!(report.status, OrchestrationState::Completed);
    assert!(!report.paused);
    let names = recorder.names();
    let paused_at = names.iter().position(|n| *n == "orchestration:paused").unwrap();
    assert_eq!(names[paused_at - 1], "stage:started");
    assert!(names[paused_at..].contains(&"orchestration:resumed"));
    assert!(matches!(
        service.pause_orchestration(id),
        Err(OrchestratorError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn test_finished_orchestrations_can_be_forgotten() {
    let (service, _recorder) = service_with(failing_on(&[]));
    let finished = service.execute(three_tier()).await.unwrap();
    let pending = service.submit(three_tier()).await.unwrap();

    assert!(matches!(
        service.forget_orchestration(pending),
        Err(OrchestratorError::Validation { .. })
    ));

    let forgotten = service.forget_orchestration(finished.id).unwrap();
    assert_eq!(forgotten.status, OrchestrationState::Completed);
    assert!(matches!(
        service.get_orchestration_status(finished.id),
        Err(OrchestratorError::OrchestrationNotFound(_))
    ));

    service.execute(three_tier()).await.unwrap();
    assert_eq!(service.forget_finished_orchestrations(), 1);
    let remaining: Vec<_> = service.list_orchestrations().into_iter().map(|s| s.id).collect();
    assert_eq!(remaining, vec![pending]);
}
