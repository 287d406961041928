//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use fleet_conductor::collaborators::{
    CollaboratorError, PipelineTrigger, RunHandle, RunStatus, SharedResourceManager,
};
use fleet_conductor::config::OrchestratorConfig;
use fleet_conductor::execution::handlers::handler_fn;
use fleet_conductor::models::{Stage, StageSpec, StageType, Task};
use fleet_conductor::TaskHandler;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Defaults with every delay shrunk so recovery runs in milliseconds
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.execution.batch_delay_ms = 0;
    config.recovery.base_delay_ms = 1;
    config.recovery.max_delay_ms = 5;
    config.pipeline.poll_interval_ms = 1;
    config
}

pub fn stage(name: &str, stage_type: StageType, tasks: Vec<Task>) -> StageSpec {
    StageSpec::from(Stage::new(name, stage_type, tasks))
}

pub fn deploy(repository: &str) -> Task {
    Task::new("deploy", repository)
}

/// Fails the listed task ids every time, succeeds everything else
pub fn failing_on(ids: &[&str]) -> Arc<dyn TaskHandler> {
    let ids: Arc<Vec<String>> = Arc::new(ids.iter().map(|id| id.to_string()).collect());
    handler_fn(move |task, _ctx| {
        let ids = Arc::clone(&ids);
        async move {
            if ids.contains(&task.id) {
                anyhow::bail!("deploy of {} failed", task.id);
            }
            Ok(json!({ "deployed": task.id }))
        }
    })
}

/// Fails each task id `failures` times before succeeding
pub struct FlakyHandler {
    failures: usize,
    calls: DashMap<String, usize>,
}

impl FlakyHandler {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: DashMap::new(),
        })
    }

    pub fn calls(&self, task_id: &str) -> usize {
        self.calls.get(task_id).map(|calls| *calls).unwrap_or(0)
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn handle(
        &self,
        task: &Task,
        _context: &fleet_conductor::TaskExecutionContext,
    ) -> anyhow::Result<serde_json::Value> {
        let call = {
            let mut calls = self.calls.entry(task.id.clone()).or_insert(0);
            *calls += 1;
            *calls
        };
        if call <= self.failures {
            anyhow::bail!("flaky failure {call} for {}", task.id);
        }
        Ok(json!({ "attempt": call }))
    }
}

/// Sleeps per task while tracking how many handlers run at once
pub struct TrackingHandler {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl TrackingHandler {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl TaskHandler for TrackingHandler {
    async fn handle(
        &self,
        task: &Task,
        _context: &fleet_conductor::TaskExecutionContext,
    ) -> anyhow::Result<serde_json::Value> {
        self.started.lock().push(task.id.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "task": task.id }))
    }
}

/// Pipeline trigger whose runs conclude with a fixed conclusion on first poll
pub struct RecordingTrigger {
    conclusion: String,
    triggered: Mutex<Vec<String>>,
}

impl RecordingTrigger {
    pub fn new(conclusion: &str) -> Arc<Self> {
        Arc::new(Self {
            conclusion: conclusion.to_string(),
            triggered: Mutex::new(Vec::new()),
        })
    }

    pub fn triggered(&self) -> Vec<String> {
        self.triggered.lock().clone()
    }
}

#[async_trait]
impl PipelineTrigger for RecordingTrigger {
    async fn trigger_external_run(
        &self,
        repository: &str,
        workflow_ref: &str,
    ) -> Result<RunHandle, CollaboratorError> {
        let mut triggered = self.triggered.lock();
        triggered.push(repository.to_string());
        Ok(RunHandle {
            run_id: format!("run-{}", triggered.len()),
            repository: repository.to_string(),
            workflow_ref: workflow_ref.to_string(),
        })
    }

    async fn poll_run_status(&self, _handle: &RunHandle) -> Result<RunStatus, CollaboratorError> {
        Ok(RunStatus {
            completed: true,
            conclusion: Some(self.conclusion.clone()),
        })
    }
}

/// Resource manager that hands out sequential claim ids and tracks open claims
#[derive(Default)]
pub struct RecordingResourceManager {
    next: AtomicUsize,
    open: DashMap<String, String>,
    history: Mutex<Vec<String>>,
}

impl RecordingResourceManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open_claims(&self) -> usize {
        self.open.len()
    }

    pub fn claimed_resources(&self) -> Vec<String> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl SharedResourceManager for RecordingResourceManager {
    async fn claim(
        &self,
        resource_id: &str,
        _owner: &str,
        _operation: &str,
    ) -> Result<String, CollaboratorError> {
        if self.open.contains_key(resource_id) {
            return Err(CollaboratorError::ResourceClaim {
                resource_id: resource_id.to_string(),
                message: "already claimed".to_string(),
            });
        }
        let claim_id = format!("claim-{}", self.next.fetch_add(1, Ordering::SeqCst));
        self.open.insert(resource_id.to_string(), claim_id.clone());
        self.history.lock().push(resource_id.to_string());
        Ok(claim_id)
    }

    async fn release(&self, resource_id: &str, claim_id: &str) -> Result<(), CollaboratorError> {
        match self.open.remove(resource_id) {
            Some((_, open)) if open == claim_id => Ok(()),
            _ => Err(CollaboratorError::ResourceRelease {
                resource_id: resource_id.to_string(),
                message: format!("unknown claim {claim_id}"),
            }),
        }
    }
}

/// Poll until the orchestration leaves every non-terminal state
pub async fn wait_for_terminal(
    service: &fleet_conductor::OrchestrationService,
    id: uuid::Uuid,
) -> fleet_conductor::OrchestrationStatusReport {
    for _ in 0..500 {
        let report = service
            .get_orchestration_status(id)
            .expect("orchestration exists");
        if report.status.is_terminal() {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("orchestration {id} did not finish");
}
