//! Task model and task type dispatch keys

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of work a task performs
///
/// The named variants form the closed built-in set; anything else is carried
/// as `Custom` and dispatched to the custom/script fallback handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Prepare,
    ApplyTemplate,
    TriggerPipeline,
    Validate,
    AnalyzeDependencies,
    Backup,
    Deploy,
    Test,
    SecurityScan,
    ComplianceCheck,
    /// Undo a repository's changes; dispatched when an orchestration rolls back
    Rollback,
    Custom(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Prepare => "prepare",
            Self::ApplyTemplate => "apply-template",
            Self::TriggerPipeline => "trigger-pipeline",
            Self::Validate => "validate",
            Self::AnalyzeDependencies => "analyze-dependencies",
            Self::Backup => "backup",
            Self::Deploy => "deploy",
            Self::Test => "test",
            Self::SecurityScan => "security-scan",
            Self::ComplianceCheck => "compliance-check",
            Self::Rollback => "rollback",
            Self::Custom(name) => name,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }

    /// The built-in task types
    pub fn builtin() -> [TaskType; 11] {
        [
            Self::Prepare,
            Self::ApplyTemplate,
            Self::TriggerPipeline,
            Self::Validate,
            Self::AnalyzeDependencies,
            Self::Backup,
            Self::Deploy,
            Self::Test,
            Self::SecurityScan,
            Self::ComplianceCheck,
            Self::Rollback,
        ]
    }
}

impl From<&str> for TaskType {
    fn from(value: &str) -> Self {
        match value {
            "prepare" => Self::Prepare,
            "apply-template" => Self::ApplyTemplate,
            "trigger-pipeline" => Self::TriggerPipeline,
            "validate" => Self::Validate,
            "analyze-dependencies" => Self::AnalyzeDependencies,
            "backup" => Self::Backup,
            "deploy" => Self::Deploy,
            "test" => Self::Test,
            "security-scan" => Self::SecurityScan,
            "compliance-check" => Self::ComplianceCheck,
            "rollback" => Self::Rollback,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for TaskType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<TaskType> for String {
    fn from(value: TaskType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A validated unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Ids of tasks that must succeed first; ids outside the current batch
    /// are treated as already satisfied
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

impl Task {
    pub fn new(task_type: impl Into<TaskType>, repository: impl Into<String>) -> Self {
        let task_type = task_type.into();
        let repository = repository.into();
        Self {
            id: format!("{task_type}-{repository}"),
            task_type,
            payload: serde_json::Value::Null,
            depends_on: Vec::new(),
            repository: Some(repository),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// Unvalidated task as submitted by a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

impl TaskSpec {
    /// Validate and normalize; `id` defaults to `<type>-<repository>`
    pub fn into_task(self) -> Result<Task> {
        let task_type = match self.task_type.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => TaskType::from(t),
            _ => {
                return Err(OrchestratorError::validation(format!(
                    "task {} is missing a type",
                    self.id
                        .as_deref()
                        .or(self.repository.as_deref())
                        .unwrap_or("<unnamed>")
                )))
            }
        };

        let id = match (self.id, self.repository.as_deref()) {
            (Some(id), _) if !id.trim().is_empty() => id,
            (_, Some(repository)) if !repository.trim().is_empty() => {
                format!("{task_type}-{repository}")
            }
            _ => {
                return Err(OrchestratorError::validation(format!(
                    "task of type '{task_type}' needs an id or a repository"
                )))
            }
        };

        Ok(Task {
            id,
            task_type,
            payload: self.payload,
            depends_on: self.depends_on,
            repository: self.repository,
        })
    }
}

impl From<Task> for TaskSpec {
    fn from(task: Task) -> Self {
        Self {
            id: Some(task.id),
            task_type: Some(task.task_type.into()),
            payload: task.payload,
            depends_on: task.depends_on,
            repository: task.repository,
        }
    }
}
