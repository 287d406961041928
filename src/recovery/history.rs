//! Bounded recovery history and per-policy usage statistics
//!
//! Reporting only; nothing here feeds back into recovery decisions.

use super::service::RecoveryRecord;
use super::RecoveryStatus;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyUsage {
    pub failure_type: String,
    pub uses: u64,
    pub successes: u64,
}

impl PolicyUsage {
    pub fn success_rate(&self) -> f64 {
        if self.uses == 0 {
            0.0
        } else {
            self.successes as f64 / self.uses as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStatistics {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub policies: Vec<PolicyUsage>,
    /// Newest first
    pub recent: Vec<RecoveryRecord>,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    completed: u64,
    policies: BTreeMap<String, PolicyUsage>,
}

#[derive(Debug)]
pub struct RecoveryHistory {
    capacity: usize,
    records: Mutex<VecDeque<RecoveryRecord>>,
    counters: Mutex<Counters>,
}

impl RecoveryHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Append a finished record, evicting the oldest one when full
    pub fn record(&self, record: RecoveryRecord) {
        {
            let mut counters = self.counters.lock();
            counters.total += 1;
            let succeeded = record.status == RecoveryStatus::Completed;
            if succeeded {
                counters.completed += 1;
            }
            if record.policy.is_some() {
                let usage = counters
                    .policies
                    .entry(record.failure_type.clone())
                    .or_insert_with(|| PolicyUsage {
                        failure_type: record.failure_type.clone(),
                        ..PolicyUsage::default()
                    });
                usage.uses += 1;
                if succeeded {
                    usage.successes += 1;
                }
            }
        }

        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Up to `limit` records, newest first
    pub fn recent(&self, limit: usize) -> Vec<RecoveryRecord> {
        self.records.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn statistics(&self, recent_limit: usize) -> RecoveryStatistics {
        let counters = self.counters.lock();
        RecoveryStatistics {
            total: counters.total,
            completed: counters.completed,
            failed: counters.total - counters.completed,
            success_rate: if counters.total == 0 {
                0.0
            } else {
                counters.completed as f64 / counters.total as f64
            },
            policies: counters.policies.values().cloned().collect(),
            recent: self.recent(recent_limit),
        }
    }
}
