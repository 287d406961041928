//! # Fleet Conductor Configuration
//!
//! Typed configuration for the planner, the execution engine, the recovery
//! subsystem and the ambient logging/event plumbing.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fleet_conductor::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected)
//! let manager = ConfigManager::load()?;
//!
//! let limit = manager.config().execution.concurrency_limit;
//! let base_delay = manager.config().recovery.base_delay();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::defaults;
use crate::graph::IndependenceCheck;
use crate::recovery::RecoveryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Task execution engine settings
    pub execution: ExecutionConfig,

    /// Phase planning and dependency analysis settings
    pub planning: PlanningConfig,

    /// Failure recovery settings
    pub recovery: RecoveryConfig,

    /// Lifecycle event delivery settings
    pub events: EventsConfig,

    /// External pipeline trigger polling settings
    pub pipeline: PipelineConfig,

    /// Logging output settings
    pub logging: LoggingConfig,
}

impl OrchestratorConfig {
    /// Validate cross-field constraints after loading
    pub fn validate(&self) -> ConfigResult<()> {
        if self.execution.concurrency_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.concurrency_limit",
                0,
                "concurrency limit must be at least 1",
            ));
        }
        if self.execution.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.batch_size",
                0,
                "batch size must be at least 1",
            ));
        }
        if self.execution.pipeline_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.pipeline_concurrency",
                0,
                "pipeline window must be at least 1",
            ));
        }
        if self.recovery.history_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "recovery.history_capacity",
                0,
                "history capacity must be at least 1",
            ));
        }
        if self.recovery.base_delay_ms > self.recovery.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "recovery.base_delay_ms",
                self.recovery.base_delay_ms,
                format!(
                    "base delay exceeds max delay ({}ms)",
                    self.recovery.max_delay_ms
                ),
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                0,
                "event channel capacity must be at least 1",
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigurationError::invalid_value(
                "logging.format",
                &self.logging.format,
                "expected 'pretty' or 'json'",
            ));
        }
        Ok(())
    }
}

/// Task execution engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Global cap on simultaneously running tasks, across all orchestrations
    pub concurrency_limit: usize,
    /// Tasks per batch for the batch strategy
    pub batch_size: usize,
    /// Pause between batches for the batch strategy
    pub batch_delay_ms: u64,
    /// In-flight window for the pipeline strategy
    pub pipeline_concurrency: usize,
    /// Per-task timeout; 0 disables it
    pub task_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: defaults::CONCURRENCY_LIMIT,
            batch_size: defaults::BATCH_SIZE,
            batch_delay_ms: defaults::BATCH_DELAY_MS,
            pipeline_concurrency: defaults::PIPELINE_CONCURRENCY,
            task_timeout_ms: 0,
        }
    }
}

impl ExecutionConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_ms > 0).then(|| Duration::from_millis(self.task_timeout_ms))
    }
}

/// Phase planning configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Allow phases with more than one node to run in parallel
    pub parallel_enabled: bool,
    /// Fixed part of the per-phase duration estimate
    pub phase_base_time_ms: u64,
    /// Per-node part of the per-phase duration estimate
    pub phase_per_node_time_ms: u64,
    /// Independence test used when forming parallel groups
    pub independence_check: IndependenceCheck,
    /// Dependency-name fragments treated as shared critical infrastructure
    pub critical_resources: Vec<String>,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            parallel_enabled: true,
            phase_base_time_ms: defaults::PHASE_BASE_TIME_MS,
            phase_per_node_time_ms: defaults::PHASE_PER_NODE_TIME_MS,
            independence_check: IndependenceCheck::default(),
            critical_resources: defaults::CRITICAL_RESOURCES
                .iter()
                .map(|resource| resource.to_string())
                .collect(),
        }
    }
}

/// Failure recovery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Base delay fed into the backoff curves
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay
    pub max_delay_ms: u64,
    /// Recovery records retained in the history ring buffer
    pub history_capacity: usize,
    /// Register the built-in policy table before applying `policies`
    pub use_default_policies: bool,
    /// Additional or overriding policies keyed by failure type
    pub policies: HashMap<String, RecoveryPolicy>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: defaults::RECOVERY_BASE_DELAY_MS,
            max_delay_ms: defaults::RECOVERY_MAX_DELAY_MS,
            history_capacity: defaults::RECOVERY_HISTORY_CAPACITY,
            use_default_policies: true,
            policies: HashMap::new(),
        }
    }
}

impl RecoveryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Lifecycle event delivery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Buffered events per broadcast subscriber before lagging
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// External pipeline polling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    /// Workflow reference used when a task payload does not name one
    pub default_workflow_ref: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::PIPELINE_POLL_INTERVAL_MS,
            max_polls: defaults::PIPELINE_MAX_POLLS,
            default_workflow_ref: "deploy.yml".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
