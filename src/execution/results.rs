//! Per-orchestration task results
//!
//! One entry per task id. A retry updates the existing entry in place under
//! the map's per-key lock instead of adding a second one, and every status
//! change is checked against the task state machine.

use crate::error::{OrchestratorError, Result};
use crate::state_machine::TaskState;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultEntry {
    pub task_id: String,
    pub stage: Option<String>,
    pub status: TaskState,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Number of times the task entered `running`
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskResultEntry {
    fn queued(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            stage: None,
            status: TaskState::Queued,
            result: None,
            error: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => u64::try_from((end - start).num_milliseconds()).ok(),
            _ => None,
        }
    }
}

/// Task counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

impl TaskCounts {
    pub fn record(&mut self, status: TaskState) {
        self.total += 1;
        match status {
            TaskState::Queued => self.queued += 1,
            TaskState::Running => self.running += 1,
            TaskState::Succeeded => self.succeeded += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Blocked => self.blocked += 1,
            TaskState::Cancelled => self.cancelled += 1,
            TaskState::Skipped => self.skipped += 1,
        }
    }

    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed + self.blocked + self.cancelled + self.skipped
    }
}

impl FromIterator<TaskState> for TaskCounts {
    fn from_iter<I: IntoIterator<Item = TaskState>>(iter: I) -> Self {
        let mut counts = Self::default();
        for status in iter {
            counts.record(status);
        }
        counts
    }
}

#[derive(Debug, Default)]
pub struct ResultStore {
    entries: DashMap<String, TaskResultEntry>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register tasks as `queued` without touching existing entries
    pub fn register(&self, stage: &str, task_ids: impl IntoIterator<Item = impl AsRef<str>>) {
        for task_id in task_ids {
            let task_id = task_id.as_ref();
            self.entries
                .entry(task_id.to_string())
                .or_insert_with(|| TaskResultEntry {
                    stage: Some(stage.to_string()),
                    ..TaskResultEntry::queued(task_id)
                });
        }
    }

    /// Begin an execution attempt; returns the attempt number
    pub fn start(&self, task_id: &str, stage: &str) -> Result<u32> {
        self.update(task_id, TaskState::Running, |entry| {
            entry.attempts += 1;
            entry.stage = Some(stage.to_string());
            entry.result = None;
            entry.error = None;
            entry.started_at = Some(Utc::now());
            entry.completed_at = None;
            entry.attempts
        })
    }

    pub fn succeed(&self, task_id: &str, result: Value) -> Result<()> {
        self.update(task_id, TaskState::Succeeded, |entry| {
            entry.result = Some(result);
            entry.completed_at = Some(Utc::now());
        })
    }

    pub fn fail(&self, task_id: &str, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        self.update(task_id, TaskState::Failed, |entry| {
            entry.error = Some(error);
            entry.completed_at = Some(Utc::now());
        })
    }

    /// Record a terminal state for a task that did not run this time
    ///
    /// Used for `blocked`, `cancelled` and `skipped`. Returns `false` without
    /// changing anything when the current state does not allow it (e.g. the
    /// task already succeeded in an earlier attempt).
    pub fn settle(&self, task_id: &str, status: TaskState, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        match self.update(task_id, status, |entry| {
            entry.error = Some(reason);
            entry.completed_at = Some(Utc::now());
        }) {
            Ok(()) => true,
            Err(err) => {
                debug!(task_id = task_id, status = %status, error = %err, "Task state left unchanged");
                false
            }
        }
    }

    fn update<T>(
        &self,
        task_id: &str,
        next: TaskState,
        apply: impl FnOnce(&mut TaskResultEntry) -> T,
    ) -> Result<T> {
        let mut entry = self
            .entries
            .entry(task_id.to_string())
            .or_insert_with(|| TaskResultEntry::queued(task_id));

        if !entry.status.can_transition_to(next) {
            return Err(OrchestratorError::invalid_transition(
                format!("task {task_id}"),
                entry.status,
                next,
            ));
        }
        entry.status = next;
        Ok(apply(&mut entry))
    }

    pub fn get(&self, task_id: &str) -> Option<TaskResultEntry> {
        self.entries.get(task_id).map(|entry| entry.clone())
    }

    pub fn status(&self, task_id: &str) -> Option<TaskState> {
        self.entries.get(task_id).map(|entry| entry.status)
    }

    /// All entries, sorted by task id
    pub fn snapshot(&self) -> Vec<TaskResultEntry> {
        let mut entries: Vec<_> = self.entries.iter().map(|entry| entry.clone()).collect();
        entries.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        entries
    }

    pub fn counts(&self) -> TaskCounts {
        self.entries.iter().map(|entry| entry.status).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
