//! # Failure Recovery Service
//!
//! Owns the policy table and drives one recovery per failure:
//!
//! 1. classify the failure (or take its pre-classified type)
//! 2. look up the policy; none means an immediate, recorded failure
//! 3. up to `max_retries` attempts of the policy strategy, sleeping the
//!    backoff delay before every attempt after the first
//! 4. each escalation strategy once, in order, until one verifies
//!
//! Strategy side effects and verification live behind [`RecoveryActions`], so
//! the loop itself knows nothing about orchestrations.

use super::backoff::BackoffCalculator;
use super::classifier::{FailureClassifier, FailureContext, FailureScope};
use super::history::{RecoveryHistory, RecoveryStatistics};
use super::policy::{default_policies, RecoveryPolicy, RecoveryStrategyKind};
use super::RecoveryStatus;
use crate::config::RecoveryConfig;
use crate::events::{EventPublisher, LifecycleEvent};
use crate::logging::log_recovery_operation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Strategy execution and verification for one failure
#[async_trait]
pub trait RecoveryActions: Send + Sync {
    /// Apply `strategy`; an error means the strategy could not run
    async fn execute(
        &self,
        strategy: RecoveryStrategyKind,
        context: &FailureContext,
    ) -> anyhow::Result<()>;

    /// Independently check whether the failure condition is resolved
    async fn verify(
        &self,
        strategy: RecoveryStrategyKind,
        context: &FailureContext,
    ) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    /// 1-based, continuing through escalation
    pub attempt: u32,
    pub strategy: RecoveryStrategyKind,
    pub success: bool,
    pub error: Option<String>,
    pub escalation: bool,
    /// Backoff slept before this attempt
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub id: Uuid,
    pub failure_type: String,
    pub scope: FailureScope,
    pub orchestration_id: Option<Uuid>,
    pub policy: Option<RecoveryPolicy>,
    pub attempts: Vec<RecoveryAttempt>,
    pub status: RecoveryStatus,
    pub escalated: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub final_error: Option<String>,
}

impl RecoveryRecord {
    fn begin(failure_type: String, context: &FailureContext, policy: Option<RecoveryPolicy>) -> Self {
        Self {
            id: Uuid::new_v4(),
            failure_type,
            scope: context.scope,
            orchestration_id: context.orchestration_id,
            policy,
            attempts: Vec::new(),
            status: RecoveryStatus::InProgress,
            escalated: false,
            started_at: Utc::now(),
            completed_at: None,
            final_error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RecoveryStatus::Completed
    }

    /// Strategy of the attempt that verified, if any
    pub fn resolved_by(&self) -> Option<RecoveryStrategyKind> {
        self.attempts.iter().find(|a| a.success).map(|a| a.strategy)
    }

    fn finish(&mut self, status: RecoveryStatus, final_error: Option<String>) {
        self.status = status;
        self.final_error = final_error;
        self.completed_at = Some(Utc::now());
    }
}

pub struct FailureRecoveryService {
    classifier: FailureClassifier,
    policies: RwLock<BTreeMap<String, RecoveryPolicy>>,
    backoff: BackoffCalculator,
    history: RecoveryHistory,
    events: EventPublisher,
}

impl std::fmt::Debug for FailureRecoveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureRecoveryService")
            .field("policies", &self.policies.read().len())
            .field("backoff", &self.backoff)
            .field("history", &self.history.len())
            .finish()
    }
}

impl FailureRecoveryService {
    pub fn new(config: &RecoveryConfig, events: EventPublisher) -> Self {
        let mut policies = if config.use_default_policies {
            default_policies()
        } else {
            BTreeMap::new()
        };
        policies.extend(
            config
                .policies
                .iter()
                .map(|(failure_type, policy)| (failure_type.clone(), policy.clone())),
        );

        Self {
            classifier: FailureClassifier::new(),
            policies: RwLock::new(policies),
            backoff: BackoffCalculator::new(config.base_delay(), config.max_delay()),
            history: RecoveryHistory::new(config.history_capacity),
            events,
        }
    }

    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }

    /// Register or replace the policy for `failure_type`
    pub fn register_policy(&self, failure_type: impl Into<String>, policy: RecoveryPolicy) {
        let failure_type = failure_type.into();
        debug!(failure_type = %failure_type, strategy = %policy.strategy, "Recovery policy registered");
        self.policies.write().insert(failure_type, policy);
    }

    pub fn policy(&self, failure_type: &str) -> Option<RecoveryPolicy> {
        self.policies.read().get(failure_type).cloned()
    }

    pub fn failure_types(&self) -> Vec<String> {
        self.policies.read().keys().cloned().collect()
    }

    #[instrument(skip(self, context, actions), fields(scope = %context.scope))]
    pub async fn recover(
        &self,
        context: &FailureContext,
        actions: &dyn RecoveryActions,
    ) -> RecoveryRecord {
        let failure_type = self.classifier.classify_context(context);
        let policy = self.policy(&failure_type);
        let mut record = RecoveryRecord::begin(failure_type.clone(), context, policy.clone());

        match policy {
            None => {
                let message = format!("No recovery policy found for failure type '{failure_type}'");
                warn!(failure_type = %failure_type, error = %context.error, "⚠️ {message}");
                record.finish(RecoveryStatus::Failed, Some(message));
            }
            Some(policy) => self.run_policy(&policy, context, actions, &mut record).await,
        }

        log_recovery_operation(
            "recover",
            &record.failure_type,
            record.resolved_by().map(|s| s.as_str()),
            &record.status.to_string(),
            record.final_error.as_deref(),
        );
        self.events.publish(LifecycleEvent::RecoveryCompleted {
            record_id: record.id,
            orchestration_id: record.orchestration_id,
            failure_type: record.failure_type.clone(),
            status: record.status,
            escalated: record.escalated,
            attempts: record.attempts.len(),
        });
        self.history.record(record.clone());
        record
    }

    async fn run_policy(
        &self,
        policy: &RecoveryPolicy,
        context: &FailureContext,
        actions: &dyn RecoveryActions,
        record: &mut RecoveryRecord,
    ) {
        info!(
            failure_type = %record.failure_type,
            strategy = %policy.strategy,
            max_retries = policy.max_retries,
            backoff = %policy.backoff,
            "🩹 Starting recovery"
        );

        for attempt in 1..=policy.max_retries {
            let delay = if attempt > 1 {
                self.backoff.delay_for_attempt(policy.backoff, attempt)
            } else {
                std::time::Duration::ZERO
            };
            if !delay.is_zero() {
                debug!(attempt = attempt, delay_ms = delay.as_millis() as u64, "Backing off before recovery attempt");
                tokio::time::sleep(delay).await;
            }

            let outcome = Self::attempt(policy.strategy, context, actions).await;
            let success = outcome.is_ok();
            record.attempts.push(RecoveryAttempt {
                attempt,
                strategy: policy.strategy,
                success,
                error: outcome.err(),
                escalation: false,
                delay_ms: delay.as_millis() as u64,
            });
            if success {
                record.finish(RecoveryStatus::Completed, None);
                return;
            }
        }

        for strategy in &policy.escalation {
            record.escalated = true;
            let attempt = record.attempts.len() as u32 + 1;
            info!(failure_type = %record.failure_type, strategy = %strategy, "⬆️ Escalating recovery");

            let outcome = Self::attempt(*strategy, context, actions).await;
            let success = outcome.is_ok();
            record.attempts.push(RecoveryAttempt {
                attempt,
                strategy: *strategy,
                success,
                error: outcome.err(),
                escalation: true,
                delay_ms: 0,
            });
            if success {
                record.finish(RecoveryStatus::Completed, None);
                return;
            }
        }

        let last_error = record
            .attempts
            .iter()
            .rev()
            .find_map(|a| a.error.clone())
            .unwrap_or_else(|| "no recovery attempts were made".to_string());
        record.finish(
            RecoveryStatus::Failed,
            Some(format!("{}: {}", context.error, last_error)),
        );
    }

    /// Run a strategy and verify it; `Err` carries the reason it did not hold
    async fn attempt(
        strategy: RecoveryStrategyKind,
        context: &FailureContext,
        actions: &dyn RecoveryActions,
    ) -> Result<(), String> {
        if let Err(err) = actions.execute(strategy, context).await {
            return Err(format!("{strategy} failed: {err:#}"));
        }
        match actions.verify(strategy, context).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!("{strategy} did not pass verification")),
            Err(err) => Err(format!("{strategy} verification errored: {err:#}")),
        }
    }

    pub fn statistics(&self, recent_limit: usize) -> RecoveryStatistics {
        self.history.statistics(recent_limit)
    }

    pub fn history(&self) -> &RecoveryHistory {
        &self.history
    }
}
