//! Failure classification
//!
//! Keyword matching over the error message, checked in a fixed order so a
//! message mentioning both a timeout and a connection is a timeout.

use crate::constants::failure_types;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Level at which a failure was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureScope {
    Orchestration,
    Stage,
    Task,
}

impl FailureScope {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Orchestration => "orchestration",
            Self::Stage => "stage",
            Self::Task => "task",
        }
    }

    fn fallback_kind(&self) -> &'static str {
        match self {
            Self::Orchestration => failure_types::GENERAL_FAILURE,
            Self::Stage | Self::Task => failure_types::EXECUTION_FAILURE,
        }
    }
}

impl fmt::Display for FailureScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Everything recovery knows about one failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    pub scope: FailureScope,
    pub orchestration_id: Option<Uuid>,
    pub stage: Option<String>,
    /// Failed task ids; for a stage failure, every failed or blocked task
    pub task_ids: Vec<String>,
    pub error: String,
    /// Pre-classified type, e.g. from an external watchdog
    pub failure_type: Option<String>,
}

impl FailureContext {
    pub fn task(
        orchestration_id: Uuid,
        stage: impl Into<String>,
        task_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            scope: FailureScope::Task,
            orchestration_id: Some(orchestration_id),
            stage: Some(stage.into()),
            task_ids: vec![task_id.into()],
            error: error.into(),
            failure_type: None,
        }
    }

    pub fn stage(
        orchestration_id: Uuid,
        stage: impl Into<String>,
        task_ids: Vec<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            scope: FailureScope::Stage,
            orchestration_id: Some(orchestration_id),
            stage: Some(stage.into()),
            task_ids,
            error: error.into(),
            failure_type: None,
        }
    }

    pub fn orchestration(orchestration_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            scope: FailureScope::Orchestration,
            orchestration_id: Some(orchestration_id),
            stage: None,
            task_ids: Vec::new(),
            error: error.into(),
            failure_type: None,
        }
    }

    pub fn with_failure_type(mut self, failure_type: impl Into<String>) -> Self {
        self.failure_type = Some(failure_type.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FailureClassifier;

impl FailureClassifier {
    pub fn new() -> Self {
        Self
    }

    /// `scope:kind` for an error message
    pub fn classify(&self, scope: FailureScope, error: &str) -> String {
        let message = error.to_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|k| message.contains(k));

        let kind = if has(&["timeout", "timed out"]) {
            failure_types::TIMEOUT
        } else if has(&["resource", "memory", "cpu"]) {
            failure_types::RESOURCE_EXHAUSTION
        } else if has(&["dependency"]) {
            failure_types::DEPENDENCY_FAILURE
        } else if has(&["network", "connection"]) {
            failure_types::NETWORK_FAILURE
        } else if has(&["permission", "unauthorized"]) {
            failure_types::PERMISSION_DENIED
        } else {
            scope.fallback_kind()
        };

        format!("{}:{}", scope.prefix(), kind)
    }

    /// Honors a pre-classified type, otherwise classifies the message
    pub fn classify_context(&self, context: &FailureContext) -> String {
        context
            .failure_type
            .clone()
            .unwrap_or_else(|| self.classify(context.scope, &context.error))
    }
}
