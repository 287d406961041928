//! Global concurrency budget
//!
//! One semaphore shared by every orchestration on a service. A task holds a
//! permit for exactly as long as it is `running`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyStats {
    pub limit: usize,
    pub active: usize,
    pub peak: usize,
    pub available: usize,
}

/// Slot held by a running task; released on drop
#[derive(Debug)]
pub struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
    limiter: Arc<ConcurrencyLimiter>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.limiter.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Arc<Self> {
        let limit = limit.max(1);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Wait for a free slot; `None` once the limiter has been closed
    pub async fn acquire(self: &Arc<Self>) -> Option<ConcurrencyPermit> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        debug!(active = active, limit = self.limit, "Concurrency slot acquired");

        Some(ConcurrencyPermit {
            _permit: permit,
            limiter: Arc::clone(self),
        })
    }

    /// Reject all pending and future acquisitions
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running tasks observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn reset_peak(&self) {
        self.peak.store(self.active(), Ordering::SeqCst);
    }

    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            limit: self.limit,
            active: self.active(),
            peak: self.peak(),
            available: self.available(),
        }
    }
}
