#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # Fleet Conductor
//!
//! Dependency-aware orchestration for deployments that span many repositories.
//!
//! ## Overview
//!
//! A caller submits a work order, either explicit stages of tasks or a set of
//! repositories plus their inter-repository dependencies. The conductor
//! validates and plans it (cycle detection, topological order, parallel
//! phases), executes each stage under a configurable strategy within one
//! global concurrency budget, routes failures through classified recovery
//! policies, and reports progress through lifecycle events and status queries.
//!
//! ## Module Organization
//!
//! - [`graph`] - dependency graph construction and analysis
//! - [`planning`] - phased execution plans and stage derivation
//! - [`execution`] - strategies, task handlers and the concurrency budget
//! - [`recovery`] - failure classification, policies, backoff and history
//! - [`orchestration`] - the service and per-orchestration state
//! - [`events`] - lifecycle event publishing
//! - [`collaborators`] - traits for dependency discovery, CI pipelines and
//!   shared resources
//! - [`config`] - layered configuration
//! - [`state_machine`] - orchestration and task states
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleet_conductor::models::{Stage, StageSpec, StageType, Task, WorkOrder};
//! use fleet_conductor::OrchestrationService;
//!
//! # tokio_test::block_on(async {
//! let service = OrchestrationService::builder().build()?;
//!
//! let verify = Stage::new(
//!     "verify",
//!     StageType::Parallel,
//!     vec![Task::new("test", "api"), Task::new("lint", "api")],
//! );
//! let order = WorkOrder::from_stages("hotfix", vec![StageSpec::from(verify)]);
//! let report = service.execute(order).await?;
//! println!("{}: {:.0}% done", report.status, report.progress.percentage);
//! # Ok::<(), fleet_conductor::OrchestratorError>(())
//! # });
//! ```

pub mod collaborators;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod execution;
pub mod graph;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod planning;
pub mod recovery;
pub mod state_machine;

pub use collaborators::{
    CollaboratorError, DependencySource, PipelineTrigger, RunHandle, RunStatus,
    SharedResourceManager,
};
pub use config::{ConfigManager, OrchestratorConfig};
pub use error::{OrchestratorError, Result};
pub use events::{EventPublisher, LifecycleEvent, LifecycleObserver};
pub use execution::{ExecutionStrategy, TaskExecutionContext, TaskHandler};
pub use graph::{DependencyAnalysis, DependencyGraph, DependencyGraphAnalyzer};
pub use models::{Stage, StageType, Task, TaskType, WorkOrder};
pub use orchestration::{
    FailureReport, OrchestrationService, OrchestrationServiceBuilder, OrchestrationStatusReport,
};
pub use planning::{ExecutionPlan, PhasePlanner};
pub use recovery::{FailureScope, RecoveryPolicy, RecoveryStrategyKind};
pub use state_machine::{OrchestrationState, TaskState};
