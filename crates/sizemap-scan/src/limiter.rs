//! Bound on simultaneous filesystem calls.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use sizemap_core::ScanError;

/// Runs tasks with at most `limit` of them in flight.
///
/// Waiters are admitted in submission order as slots free up. The slot is
/// held by a permit guard for the lifetime of the task, so it is released
/// however the task ends: normal return, an error value, a panic, or the
/// future being dropped. Clones share the same slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
    cancel: CancellationToken,
}

impl ConcurrencyLimiter {
    /// Create a limiter allowing `limit` concurrent tasks (at least one).
    pub fn new(limit: usize) -> Self {
        Self::with_cancellation(limit, CancellationToken::new())
    }

    /// Create a limiter whose waiting tasks give up once `cancel` fires.
    pub fn with_cancellation(limit: usize, cancel: CancellationToken) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            cancel,
        }
    }

    /// Configured bound.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Whether the associated scan was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for a slot, then run `task` while holding it.
    ///
    /// Fails with [`ScanError::Interrupted`] if cancellation fires before a
    /// slot is granted; a task that already started runs to completion.
    pub async fn run<F, T>(&self, task: F) -> Result<T, ScanError>
    where
        F: Future<Output = T>,
    {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ScanError::Interrupted),
            permit = self.semaphore.acquire() => permit.map_err(|_| ScanError::Interrupted)?,
        };
        Ok(task.await)
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(sizemap_core::DEFAULT_CONCURRENCY)
    }
}
