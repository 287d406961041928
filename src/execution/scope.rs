//! Per-orchestration execution state shared by the engine and recovery

use super::results::ResultStore;
use crate::models::OrchestrationOptions;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Knobs that recovery strategies adjust for the rest of a run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOverrides {
    /// Applied to `execution.task_timeout_ms`
    pub timeout_multiplier: f64,
    /// Handlers should prefer safe, degraded behavior
    pub fallback_configuration: bool,
}

impl Default for ExecutionOverrides {
    fn default() -> Self {
        Self {
            timeout_multiplier: 1.0,
            fallback_configuration: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionScope {
    orchestration_id: Uuid,
    options: OrchestrationOptions,
    results: Arc<ResultStore>,
    cancelled: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    /// Wakes tasks parked by a pause on resume or cancel
    gate: Arc<Notify>,
    overrides: Arc<RwLock<ExecutionOverrides>>,
}

impl ExecutionScope {
    pub fn new(orchestration_id: Uuid, options: OrchestrationOptions) -> Self {
        Self {
            orchestration_id,
            options,
            results: Arc::new(ResultStore::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(Notify::new()),
            overrides: Arc::new(RwLock::new(ExecutionOverrides::default())),
        }
    }

    pub fn orchestration_id(&self) -> Uuid {
        self.orchestration_id
    }

    pub fn options(&self) -> &OrchestrationOptions {
        &self.options
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }

    /// Same id and options, fresh results; shares cancellation and pausing
    pub fn child(&self) -> Self {
        Self {
            results: Arc::new(ResultStore::new()),
            ..self.clone()
        }
    }

    /// Stop new tasks from starting; running tasks finish on their own
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    /// Hold back tasks that have not started yet; returns `false` if already paused
    pub fn pause(&self) -> bool {
        !self.paused.swap(true, Ordering::SeqCst)
    }

    /// Let held-back tasks start; returns `false` if not paused
    pub fn resume(&self) -> bool {
        let was_paused = self.paused.swap(false, Ordering::SeqCst);
        self.gate.notify_waiters();
        was_paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Wait while paused; returns early on cancellation
    pub async fn wait_while_paused(&self) {
        loop {
            let woken = self.gate.notified();
            if !self.is_paused() || self.is_cancelled() {
                return;
            }
            woken.await;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn overrides(&self) -> ExecutionOverrides {
        self.overrides.read().clone()
    }

    pub fn update_overrides(&self, apply: impl FnOnce(&mut ExecutionOverrides)) {
        apply(&mut self.overrides.write());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn scope() -> ExecutionScope {
        ExecutionScope::new(Uuid::new_v4(), OrchestrationOptions::default())
    }

    #[tokio::test]
    async fn test_resume_releases_paused_waiters() {
        let scope = scope();
        assert!(scope.pause());
        assert!(!scope.pause());

        let waiting = tokio::spawn({
            let scope = scope.clone();
            async move { scope.wait_while_paused().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        assert!(scope.resume());
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(!scope.resume());
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_waiters() {
        let scope = scope();
        scope.pause();
        let waiting = tokio::spawn({
            let scope = scope.clone();
            async move { scope.wait_while_paused().await }
        });

        scope.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(scope.is_paused());
    }

    #[test]
    fn test_child_shares_cancellation_but_not_results() {
        let scope = scope();
        scope.results().register("build", ["deploy-api"]);
        let child = scope.child();

        assert!(child.results().is_empty());
        scope.cancel();
        assert!(child.is_cancelled());
        assert_eq!(child.orchestration_id(), scope.orchestration_id());
    }
}
