//! Worker pool: bounds concurrent job executions with a tokio `Semaphore`.
//!
//! The pool size is the engine's notion of capacity; [`super::LocalRuntime`]
//! takes a permit before every execution and releases it when the job's
//! outcome is known.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ErrorCode, Result, TollgateError};

/// A handle to a worker slot that is released when dropped.
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    pool_stats: Arc<PoolStats>,
    started_at: Instant,
    finished: bool,
}

impl WorkerPermit {
    /// Time since the slot was taken.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Mark this execution as successful.
    pub fn mark_success(mut self) {
        self.finished = true;
        self.pool_stats.record_success(self.started_at.elapsed());
    }

    /// Mark this execution as failed.
    pub fn mark_failure(mut self) {
        self.finished = true;
        self.pool_stats.record_failure(self.started_at.elapsed());
    }
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        // Dropped without an outcome, e.g. the execution task was aborted.
        if !self.finished {
            self.pool_stats.record_unknown();
        }
    }
}

#[derive(Default)]
struct PoolStats {
    acquired: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    unknown: AtomicU64,
    /// try_acquire calls that found the pool full
    saturated: AtomicU64,
    acquire_timeouts: AtomicU64,
    total_wait_time_us: AtomicU64,
    total_exec_time_us: AtomicU64,
    peak_concurrent: AtomicUsize,
    current_concurrent: AtomicUsize,
}

impl PoolStats {
    fn record_acquire(&self, wait_time: Duration) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_us
            .fetch_add(wait_time.as_micros() as u64, Ordering::Relaxed);
        let current = self.current_concurrent.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_concurrent.fetch_max(current, Ordering::Relaxed);
    }

    fn record_release(&self, exec_time: Option<Duration>) {
        self.current_concurrent.fetch_sub(1, Ordering::Relaxed);
        if let Some(exec_time) = exec_time {
            self.total_exec_time_us
                .fetch_add(exec_time.as_micros() as u64, Ordering::Relaxed);
        }
    }

    fn record_success(&self, exec_time: Duration) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_release(Some(exec_time));
    }

    fn record_failure(&self, exec_time: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.record_release(Some(exec_time));
    }

    fn record_unknown(&self) {
        self.unknown.fetch_add(1, Ordering::Relaxed);
        self.record_release(None);
    }
}

/// Fixed-size pool of worker slots.
pub struct WorkerPool {
    name: String,
    size: usize,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
    created_at: Instant,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let name = name.into();
        tracing::info!(pool_name = %name, size, "Worker pool created");

        Self {
            name,
            size,
            semaphore: Arc::new(Semaphore::new(size)),
            stats: Arc::new(PoolStats::default()),
            created_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn active_workers(&self) -> usize {
        self.size.saturating_sub(self.semaphore.available_permits())
    }

    pub fn is_at_capacity(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Wait up to `timeout` for a free slot.
    pub async fn acquire(&self, timeout: Duration) -> Result<WorkerPermit> {
        let start = Instant::now();

        let permit = tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| {
                self.stats.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    pool_name = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Worker permit acquire timed out"
                );
                TollgateError::new(
                    ErrorCode::WorkerPoolExhausted,
                    format!("Worker pool '{}' has no free slot", self.name),
                )
            })?
            .map_err(|_| {
                TollgateError::new(
                    ErrorCode::RuntimeShutdown,
                    format!("Worker pool '{}' is closed", self.name),
                )
            })?;

        Ok(self.permit(permit, start.elapsed()))
    }

    /// Take a free slot without waiting.
    pub fn try_acquire(&self) -> Option<WorkerPermit> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(self.permit(permit, Duration::ZERO)),
            Err(_) => {
                self.stats.saturated.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Refuse new permits; outstanding permits stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    fn permit(&self, permit: OwnedSemaphorePermit, wait_time: Duration) -> WorkerPermit {
        self.stats.record_acquire(wait_time);
        tracing::trace!(
            pool_name = %self.name,
            available = self.semaphore.available_permits(),
            "Worker permit acquired"
        );
        WorkerPermit {
            _permit: permit,
            pool_stats: self.stats.clone(),
            started_at: Instant::now(),
            finished: false,
        }
    }

    pub fn stats(&self) -> WorkerPoolStats {
        let stats = &self.stats;
        let acquired = stats.acquired.load(Ordering::Relaxed);
        let succeeded = stats.succeeded.load(Ordering::Relaxed);
        let failed = stats.failed.load(Ordering::Relaxed);
        let completed = succeeded + failed;

        WorkerPoolStats {
            name: self.name.clone(),
            size: self.size,
            available_permits: self.semaphore.available_permits(),
            active_workers: self.active_workers(),
            acquired,
            succeeded,
            failed,
            unknown: stats.unknown.load(Ordering::Relaxed),
            saturated: stats.saturated.load(Ordering::Relaxed),
            acquire_timeouts: stats.acquire_timeouts.load(Ordering::Relaxed),
            peak_concurrent: stats.peak_concurrent.load(Ordering::Relaxed),
            avg_wait_time_us: if acquired > 0 {
                stats.total_wait_time_us.load(Ordering::Relaxed) / acquired
            } else {
                0
            },
            avg_exec_time_us: if completed > 0 {
                stats.total_exec_time_us.load(Ordering::Relaxed) / completed
            } else {
                0
            },
            uptime_secs: self.created_at.elapsed().as_secs(),
        }
    }
}

/// Statistics for the worker pool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerPoolStats {
    pub name: String,
    pub size: usize,
    pub available_permits: usize,
    pub active_workers: usize,
    /// Slots handed out
    pub acquired: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Slots released without an outcome
    pub unknown: u64,
    /// Non-blocking acquires that found the pool full
    pub saturated: u64,
    pub acquire_timeouts: u64,
    pub peak_concurrent: usize,
    pub avg_wait_time_us: u64,
    pub avg_exec_time_us: u64,
    pub uptime_secs: u64,
}

impl WorkerPoolStats {
    /// Calculate success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / total as f64) * 100.0
        }
    }

    /// Calculate utilization as a percentage.
    pub fn utilization(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        (self.active_workers as f64 / self.size as f64) * 100.0
    }

    /// Calculate throughput (jobs per second).
    pub fn throughput(&self) -> f64 {
        if self.uptime_secs == 0 {
            0.0
        } else {
            (self.succeeded + self.failed) as f64 / self.uptime_secs as f64
        }
    }
}
