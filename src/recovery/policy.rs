//! Recovery policies and the closed set of recovery strategies

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategyKind {
    RetryWithBackoff,
    GracefulShutdown,
    ResourceScaling,
    DependencyIsolation,
    TimeoutExtension,
    ResourceOptimization,
    LoadBalancing,
    MemoryCleanup,
    DiskCleanup,
    Cancel,
    SkipTask,
    FallbackConfiguration,
}

impl RecoveryStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryWithBackoff => "retry_with_backoff",
            Self::GracefulShutdown => "graceful_shutdown",
            Self::ResourceScaling => "resource_scaling",
            Self::DependencyIsolation => "dependency_isolation",
            Self::TimeoutExtension => "timeout_extension",
            Self::ResourceOptimization => "resource_optimization",
            Self::LoadBalancing => "load_balancing",
            Self::MemoryCleanup => "memory_cleanup",
            Self::DiskCleanup => "disk_cleanup",
            Self::Cancel => "cancel",
            Self::SkipTask => "skip_task",
            Self::FallbackConfiguration => "fallback_configuration",
        }
    }

    /// Strategies that end the orchestration instead of repairing it
    pub fn is_terminating(&self) -> bool {
        matches!(self, Self::GracefulShutdown | Self::Cancel)
    }
}

impl fmt::Display for RecoveryStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecoveryStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry_with_backoff" => Ok(Self::RetryWithBackoff),
            "graceful_shutdown" => Ok(Self::GracefulShutdown),
            "resource_scaling" => Ok(Self::ResourceScaling),
            "dependency_isolation" => Ok(Self::DependencyIsolation),
            "timeout_extension" => Ok(Self::TimeoutExtension),
            "resource_optimization" => Ok(Self::ResourceOptimization),
            "load_balancing" => Ok(Self::LoadBalancing),
            "memory_cleanup" => Ok(Self::MemoryCleanup),
            "disk_cleanup" => Ok(Self::DiskCleanup),
            "cancel" => Ok(Self::Cancel),
            "skip_task" => Ok(Self::SkipTask),
            "fallback_configuration" => Ok(Self::FallbackConfiguration),
            _ => Err(format!("Invalid recovery strategy: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Exponential,
    Linear,
    Fixed,
    Fibonacci,
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exponential => write!(f, "exponential"),
            Self::Linear => write!(f, "linear"),
            Self::Fixed => write!(f, "fixed"),
            Self::Fibonacci => write!(f, "fibonacci"),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

/// How to recover from one failure type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    pub strategy: RecoveryStrategyKind,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
    /// Tried once each, in order, after the retries are exhausted
    #[serde(default)]
    pub escalation: Vec<RecoveryStrategyKind>,
}

impl RecoveryPolicy {
    pub fn new(strategy: RecoveryStrategyKind, max_retries: u32, backoff: BackoffKind) -> Self {
        Self {
            strategy,
            max_retries,
            backoff,
            escalation: Vec::new(),
        }
    }

    pub fn with_escalation(mut self, escalation: Vec<RecoveryStrategyKind>) -> Self {
        self.escalation = escalation;
        self
    }
}

/// Built-in policy table keyed by failure type
///
/// `task:permission_denied` and `stage:permission_denied` are deliberately
/// absent: retrying cannot fix credentials, so such failures surface directly.
pub fn default_policies() -> BTreeMap<String, RecoveryPolicy> {
    use BackoffKind::*;
    use RecoveryStrategyKind::*;

    let table = [
        (
            "task:timeout",
            RecoveryPolicy::new(TimeoutExtension, 2, Linear).with_escalation(vec![RetryWithBackoff]),
        ),
        (
            "task:resource_exhaustion",
            RecoveryPolicy::new(ResourceOptimization, 2, Exponential).with_escalation(vec![
                MemoryCleanup,
                DiskCleanup,
                ResourceScaling,
            ]),
        ),
        (
            "task:dependency_failure",
            RecoveryPolicy::new(DependencyIsolation, 1, Fixed).with_escalation(vec![RetryWithBackoff]),
        ),
        (
            "task:network_failure",
            RecoveryPolicy::new(RetryWithBackoff, 3, Exponential)
                .with_escalation(vec![FallbackConfiguration]),
        ),
        (
            "task:execution_failure",
            RecoveryPolicy::new(RetryWithBackoff, 2, Exponential)
                .with_escalation(vec![FallbackConfiguration]),
        ),
        (
            "stage:timeout",
            RecoveryPolicy::new(TimeoutExtension, 1, Fixed),
        ),
        (
            "stage:resource_exhaustion",
            RecoveryPolicy::new(LoadBalancing, 1, Fixed).with_escalation(vec![ResourceScaling]),
        ),
        (
            "stage:dependency_failure",
            RecoveryPolicy::new(RetryWithBackoff, 1, Fixed),
        ),
        (
            "stage:network_failure",
            RecoveryPolicy::new(RetryWithBackoff, 2, Fibonacci),
        ),
        (
            "stage:execution_failure",
            RecoveryPolicy::new(RetryWithBackoff, 1, Fixed),
        ),
        (
            "orchestration:timeout",
            RecoveryPolicy::new(GracefulShutdown, 1, Fixed).with_escalation(vec![Cancel]),
        ),
        (
            "orchestration:resource_exhaustion",
            RecoveryPolicy::new(LoadBalancing, 2, Exponential)
                .with_escalation(vec![ResourceScaling, GracefulShutdown]),
        ),
        (
            "orchestration:general_failure",
            RecoveryPolicy::new(RetryWithBackoff, 1, Fixed).with_escalation(vec![Cancel]),
        ),
    ];

    table
        .into_iter()
        .map(|(failure_type, policy)| (failure_type.to_string(), policy))
        .collect()
}
