//! # Failure Recovery
//!
//! Classifies failures into `scope:kind` failure types, looks up the policy
//! for the type, and drives bounded retries with backoff followed by the
//! policy's escalation chain. Every attempt is verified independently of the
//! strategy having run; every recovery is recorded for statistics.

pub mod backoff;
pub mod classifier;
pub mod history;
pub mod policy;
pub mod service;

pub use backoff::BackoffCalculator;
pub use classifier::{FailureClassifier, FailureContext, FailureScope};
pub use history::{PolicyUsage, RecoveryHistory, RecoveryStatistics};
pub use policy::{default_policies, BackoffKind, RecoveryPolicy, RecoveryStrategyKind};
pub use service::{FailureRecoveryService, RecoveryActions, RecoveryAttempt, RecoveryRecord};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recovery record lifecycle: `in_progress -> completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    InProgress,
    Completed,
    Failed,
}

impl RecoveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
