mod common;

use common::{deploy, failing_on, fast_config, TrackingHandler};
use fleet_conductor::events::EventPublisher;
use fleet_conductor::execution::{ExecutionScope, HandlerRegistry, TaskExecutionEngine};
use fleet_conductor::models::{OrchestrationOptions, Stage, StageType};
use fleet_conductor::{ExecutionStrategy, TaskState};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn engine(concurrency_limit: usize, handler: Arc<dyn fleet_conductor::TaskHandler>) -> TaskExecutionEngine {
    let mut config = fast_config().execution;
    config.concurrency_limit = concurrency_limit;
    config.batch_size = 2;
    config.pipeline_concurrency = 2;

    let registry = HandlerRegistry::new();
    registry.register("deploy", handler);
    TaskExecutionEngine::new(config, Arc::new(registry), EventPublisher::new(256))
}

fn scope() -> ExecutionScope {
    ExecutionScope::new(Uuid::new_v4(), OrchestrationOptions::default())
}

fn fleet(prefix: &str, count: usize) -> Vec<fleet_conductor::Task> {
    (1..=count).map(|n| deploy(&format!("{prefix}{n}"))).collect()
}

#[tokio::test]
async fn test_parallel_fan_out_settles_every_task() {
    let engine = engine(10, failing_on(&["deploy-svc3"]));
    let stage = Stage::new("fan-out", StageType::Parallel, fleet("svc", 5));

    let outcome = engine.execute_stage(&scope(), &stage, None).await;

    assert_eq!(outcome.tasks.len(), 5);
    assert!(outcome.tasks.iter().all(|task| task.status.is_terminal()));
    assert_eq!(outcome.failure_count(), 1);
    assert_eq!(outcome.counts().succeeded, 4);
    let failed: Vec<_> = outcome.failed_tasks().map(|task| task.task_id.as_str()).collect();
    assert_eq!(failed, vec!["deploy-svc3"]);
}

#[tokio::test]
async fn test_concurrency_budget_is_shared_across_orchestrations() {
    let tracker = TrackingHandler::new(Duration::from_millis(20));
    let engine = engine(3, tracker.clone());

    let first = Stage::new("first", StageType::Parallel, fleet("a", 6));
    let second = Stage::new("second", StageType::Parallel, fleet("b", 6));
    let (scope_a, scope_b) = (scope(), scope());

    let (left, right) = tokio::join!(
        engine.execute_stage(&scope_a, &first, None),
        engine.execute_stage(&scope_b, &second, None),
    );

    assert!(left.is_success());
    assert!(right.is_success());
    assert!(tracker.peak() <= 3, "peak was {}", tracker.peak());
    assert!(engine.limiter().peak() <= 3);
    assert_eq!(engine.limiter().active(), 0);
}

#[tokio::test]
async fn test_batch_strategy_runs_chunks_in_order_without_short_circuit() {
    let tracker = TrackingHandler::new(Duration::from_millis(5));
    let engine = engine(10, tracker.clone());
    let stage = Stage::new("batched", StageType::Parallel, fleet("r", 5))
        .with_strategy(ExecutionStrategy::Batch);

    let outcome = engine.execute_stage(&scope(), &stage, None).await;
    assert!(outcome.is_success());
    assert!(tracker.peak() <= 2);

    let started = tracker.started();
    let position = |id: &str| started.iter().position(|s| s == id).unwrap();
    assert!(position("deploy-r1") < position("deploy-r3"));
    assert!(position("deploy-r2") < position("deploy-r3"));
    assert!(position("deploy-r4") < position("deploy-r5"));
}

#[tokio::test]
async fn test_batch_failure_does_not_stop_later_batches() {
    let engine = engine(10, failing_on(&["deploy-r1"]));
    let stage = Stage::new("batched", StageType::Parallel, fleet("r", 4))
        .with_strategy(ExecutionStrategy::Batch);

    let outcome = engine.execute_stage(&scope(), &stage, None).await;
    assert_eq!(outcome.failure_count(), 1);
    assert_eq!(outcome.counts().succeeded, 3);
}

#[tokio::test]
async fn test_pipeline_window_bounds_in_flight_tasks() {
    let tracker = TrackingHandler::new(Duration::from_millis(10));
    let engine = engine(10, tracker.clone());
    let stage = Stage::new("piped", StageType::Parallel, fleet("p", 6))
        .with_strategy(ExecutionStrategy::Pipeline);

    let outcome = engine.execute_stage(&scope(), &stage, None).await;
    assert!(outcome.is_success());
    assert_eq!(tracker.started().len(), 6);
    assert!(tracker.peak() <= 2, "peak was {}", tracker.peak());
}

#[tokio::test]
async fn test_dependency_ordered_blocks_dependents_of_failures() {
    let engine = engine(10, failing_on(&["deploy-db"]));
    let stage = Stage::new(
        "ordered",
        StageType::DependencyOrdered,
        vec![
            deploy("db"),
            deploy("cache"),
            deploy("api").depends_on("deploy-db"),
            deploy("web").depends_on("deploy-cache"),
        ],
    );
    let analysis = fleet_conductor::PhasePlanner::default()
        .analyze_stage(&stage)
        .unwrap()
        .expect("dependency-ordered stages are analyzed");

    let outcome = engine.execute_stage(&scope(), &stage, Some(&analysis)).await;
    let status = |id: &str| {
        outcome
            .tasks
            .iter()
            .find(|task| task.task_id == id)
            .map(|task| task.status)
            .unwrap()
    };

    assert_eq!(status("deploy-db"), TaskState::Failed);
    assert_eq!(status("deploy-api"), TaskState::Blocked);
    assert_eq!(status("deploy-cache"), TaskState::Succeeded);
    assert_eq!(status("deploy-web"), TaskState::Succeeded);
}

#[tokio::test]
async fn test_continue_past_failed_dependencies_runs_dependents() {
    let engine = engine(10, failing_on(&["deploy-db"]));
    let stage = Stage::new(
        "ordered",
        StageType::DependencyOrdered,
        vec![deploy("db"), deploy("api").depends_on("deploy-db")],
    );
    let analysis = fleet_conductor::PhasePlanner::default()
        .analyze_stage(&stage)
        .unwrap();
    let scope = ExecutionScope::new(
        Uuid::new_v4(),
        OrchestrationOptions {
            continue_past_failed_dependencies: true,
            ..OrchestrationOptions::default()
        },
    );

    let outcome = engine.execute_stage(&scope, &stage, analysis.as_ref()).await;
    assert_eq!(outcome.tasks[1].status, TaskState::Succeeded);
}

#[tokio::test]
async fn test_task_events_are_published_in_order() {
    let events = EventPublisher::new(64);
    let recorder = fleet_conductor::events::EventRecorder::new();
    events.add_observer(recorder.clone());

    let registry = HandlerRegistry::new();
    registry.register("deploy", failing_on(&["deploy-b"]));
    let engine = TaskExecutionEngine::new(fast_config().execution, Arc::new(registry), events);
    let stage = Stage::new("seq", StageType::Sequential, vec![deploy("a"), deploy("b")]);

    engine.execute_stage(&scope(), &stage, None).await;

    assert_eq!(
        recorder.names(),
        vec!["task:started", "task:completed", "task:started", "task:failed"]
    );
}
