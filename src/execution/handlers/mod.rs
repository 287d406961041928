//! # Task Handlers
//!
//! The engine knows nothing about what a task does: it resolves a handler by
//! task type, calls it, and records the returned value or error. Built-in
//! handlers cover the closed set of task types; custom types go to the
//! fallback handler (a shell script runner by default).

pub mod builtin;
pub mod pipeline;
pub mod script;

pub use builtin::{AnalyzeDependenciesHandler, SimulatedHandler};
pub use pipeline::PipelineHandler;
pub use script::ScriptHandler;

use crate::collaborators::{DependencySource, PipelineTrigger};
use crate::config::PipelineConfig;
use crate::graph::DependencyGraphAnalyzer;
use crate::models::{Task, TaskType};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// What a handler may know about the run it executes in
#[derive(Debug, Clone)]
pub struct TaskExecutionContext {
    pub orchestration_id: Uuid,
    pub stage: String,
    /// 1 on first execution, incremented on every re-run
    pub attempt: u32,
    /// Set by the `fallback_configuration` recovery strategy
    pub fallback_configuration: bool,
    cancelled: Arc<AtomicBool>,
}

impl TaskExecutionContext {
    pub fn new(
        orchestration_id: Uuid,
        stage: impl Into<String>,
        attempt: u32,
        fallback_configuration: bool,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            orchestration_id,
            stage: stage.into(),
            attempt,
            fallback_configuration,
            cancelled,
        }
    }

    /// Long-running handlers may check this to stop early
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task, context: &TaskExecutionContext) -> anyhow::Result<Value>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task, TaskExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn handle(&self, task: &Task, context: &TaskExecutionContext) -> anyhow::Result<Value> {
        (self.0)(task.clone(), context.clone()).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(handler: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Task, TaskExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler(handler))
}

/// Task type to handler table
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn TaskHandler>>,
    fallback: RwLock<Option<Arc<dyn TaskHandler>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registered", &self.registered_types())
            .field("fallback", &self.fallback.read().is_some())
            .finish()
    }
}

impl HandlerRegistry {
    /// Empty registry; every task fails until handlers are registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a handler for every built-in task type and the script fallback
    pub fn with_builtins(
        pipeline: PipelineConfig,
        trigger: Option<Arc<dyn PipelineTrigger>>,
        dependency_source: Option<Arc<dyn DependencySource>>,
        analyzer: DependencyGraphAnalyzer,
    ) -> Self {
        let registry = Self::new();
        for task_type in TaskType::builtin() {
            let handler: Arc<dyn TaskHandler> = match task_type {
                TaskType::TriggerPipeline => {
                    Arc::new(PipelineHandler::new(trigger.clone(), pipeline.clone()))
                }
                TaskType::AnalyzeDependencies => Arc::new(AnalyzeDependenciesHandler::new(
                    dependency_source.clone(),
                    analyzer.clone(),
                )),
                _ => Arc::new(SimulatedHandler),
            };
            registry.register(task_type, handler);
        }
        registry.set_fallback(Arc::new(ScriptHandler));
        registry
    }

    /// Register or replace the handler for one task type
    pub fn register(&self, task_type: impl Into<TaskType>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type.into().as_str().to_string(), handler);
    }

    /// Handler for custom task types without a registered handler
    pub fn set_fallback(&self, handler: Arc<dyn TaskHandler>) {
        *self.fallback.write() = Some(handler);
    }

    pub fn resolve(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        if let Some(handler) = self.handlers.get(task_type.as_str()) {
            return Some(Arc::clone(handler.value()));
        }
        if task_type.is_custom() {
            return self.fallback.read().clone();
        }
        None
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}
