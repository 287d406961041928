//! # System Constants
//!
//! Event names, failure-type prefixes and default operating limits shared by the
//! planner, the execution engine and the recovery subsystem.

/// Lifecycle event names delivered to monitoring sinks
pub mod events {
    pub const ORCHESTRATION_STARTED: &str = "orchestration:started";
    pub const ORCHESTRATION_COMPLETED: &str = "orchestration:completed";
    pub const ORCHESTRATION_FAILED: &str = "orchestration:failed";
    pub const ORCHESTRATION_CANCELLED: &str = "orchestration:cancelled";
    pub const ORCHESTRATION_PAUSED: &str = "orchestration:paused";
    pub const ORCHESTRATION_RESUMED: &str = "orchestration:resumed";

    pub const STAGE_STARTED: &str = "stage:started";
    pub const STAGE_COMPLETED: &str = "stage:completed";
    pub const STAGE_FAILED: &str = "stage:failed";

    pub const TASK_STARTED: &str = "task:started";
    pub const TASK_COMPLETED: &str = "task:completed";
    pub const TASK_FAILED: &str = "task:failed";

    pub const RECOVERY_COMPLETED: &str = "recovery:completed";

    pub const ROLLBACK_STARTED: &str = "rollback:started";
    pub const ROLLBACK_COMPLETED: &str = "rollback:completed";
}

/// Failure-type suffixes produced by the classifier
pub mod failure_types {
    pub const TIMEOUT: &str = "timeout";
    pub const RESOURCE_EXHAUSTION: &str = "resource_exhaustion";
    pub const DEPENDENCY_FAILURE: &str = "dependency_failure";
    pub const NETWORK_FAILURE: &str = "network_failure";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const GENERAL_FAILURE: &str = "general_failure";
    pub const EXECUTION_FAILURE: &str = "execution_failure";
}

/// Default operating limits
pub mod defaults {
    pub const CONCURRENCY_LIMIT: usize = 10;
    pub const BATCH_SIZE: usize = 5;
    pub const BATCH_DELAY_MS: u64 = 1_000;
    pub const PIPELINE_CONCURRENCY: usize = 3;

    pub const PHASE_BASE_TIME_MS: u64 = 30_000;
    pub const PHASE_PER_NODE_TIME_MS: u64 = 10_000;

    pub const RECOVERY_BASE_DELAY_MS: u64 = 1_000;
    pub const RECOVERY_MAX_DELAY_MS: u64 = 60_000;
    pub const RECOVERY_HISTORY_CAPACITY: usize = 1_000;

    pub const EVENT_CHANNEL_CAPACITY: usize = 1_000;

    pub const PIPELINE_POLL_INTERVAL_MS: u64 = 5_000;
    pub const PIPELINE_MAX_POLLS: u32 = 120;

    /// Dependency-name fragments treated as contended shared infrastructure
    pub const CRITICAL_RESOURCES: &[&str] = &["database", "storage", "network"];
}

/// Risk-assessment thresholds and weights
pub mod risk {
    /// More dependents than this makes a node a single point of failure
    pub const SINGLE_POINT_OF_FAILURE_DEPENDENTS: usize = 3;
    /// More in+out edges than this makes a node highly connected
    pub const HIGHLY_CONNECTED_DEGREE: usize = 5;
    /// More dependents than this makes a dependency critical
    pub const CRITICAL_DEPENDENCY_DEPENDENTS: usize = 2;

    pub const SINGLE_POINT_OF_FAILURE_WEIGHT: u32 = 10;
    pub const HIGHLY_CONNECTED_WEIGHT: u32 = 5;
    pub const CRITICAL_DEPENDENCY_WEIGHT: u32 = 3;
    pub const MAX_RISK_SCORE: u32 = 100;
}
