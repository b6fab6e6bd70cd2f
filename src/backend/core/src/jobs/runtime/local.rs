//! In-process execution runtime.
//!
//! Definitions and triggers are persisted through the [`EngineStore`] so a
//! restarted process picks up where the previous one stopped. A poll loop
//! fires due triggers onto the [`WorkerPool`]; every execution runs under a
//! timeout and ends with a notification to the completion listener.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::JobRuntime;
use crate::config::RuntimeConfig;
use crate::error::{ErrorCode, Result, TollgateError};
use crate::jobs::listener::CompletionListener;
use crate::jobs::registry::JobRegistry;
use crate::jobs::worker_pool::{WorkerPermit, WorkerPool, WorkerPoolStats};
use crate::jobs::{
    CronSchedule, JobContext, JobDefinition, JobError, JobKey, JobOutcome, JobResult, Trigger,
};
use crate::store::{EngineStore, StoredJob};
use crate::telemetry::EngineMetrics;

/// Runtime executing jobs inside this process.
#[derive(Clone)]
pub struct LocalRuntime {
    inner: Arc<Inner>,
}

struct Inner {
    instance: String,
    config: RuntimeConfig,
    store: Arc<dyn EngineStore>,
    registry: Arc<JobRegistry>,
    pool: WorkerPool,
    /// Pending triggers, mirrored from the store
    triggers: Mutex<HashMap<JobKey, Trigger>>,
    executing: DashMap<JobKey, DateTime<Utc>>,
    listener: RwLock<Option<Weak<dyn CompletionListener>>>,
    wake: Notify,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl LocalRuntime {
    pub fn new(
        instance: impl Into<String>,
        config: RuntimeConfig,
        store: Arc<dyn EngineStore>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        let instance = instance.into();
        let pool = WorkerPool::new(format!("{}-workers", instance), config.worker_pool_size);

        Self {
            inner: Arc::new(Inner {
                instance,
                config,
                store,
                registry,
                pool,
                triggers: Mutex::new(HashMap::new()),
                executing: DashMap::new(),
                listener: RwLock::new(None),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Re-arm persisted triggers and start the poll loop.
    ///
    /// Returns the number of triggers restored from the store.
    pub async fn start(&self) -> Result<usize> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(TollgateError::new(
                ErrorCode::InvalidStateTransition,
                "Runtime is already started",
            ));
        }

        let armed = match self.inner.store.list_armed_jobs().await {
            Ok(armed) => armed,
            Err(error) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(error);
            }
        };

        let restored = {
            let mut triggers = self.inner.triggers.lock();
            for job in armed {
                if let Some(trigger) = job.trigger {
                    triggers.insert(job.definition.key, trigger);
                }
            }
            triggers.len()
        };

        let inner = self.inner.clone();
        self.inner.tracker.spawn(inner.run());

        tracing::info!(
            instance = %self.inner.instance,
            workers = self.inner.pool.size(),
            restored,
            "Local runtime started"
        );
        Ok(restored)
    }

    /// Stop firing triggers and wait up to the shutdown timeout for executing
    /// jobs. Returns false if jobs were still running when the wait ended.
    pub async fn shutdown(&self) -> bool {
        tracing::info!(instance = %self.inner.instance, "Local runtime shutting down");

        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        let drained = tokio::time::timeout(self.inner.config.shutdown_timeout, self.inner.tracker.wait())
            .await
            .is_ok();
        self.inner.pool.close();

        if drained {
            tracing::info!(instance = %self.inner.instance, "Local runtime stopped");
        } else {
            tracing::warn!(
                instance = %self.inner.instance,
                executing = self.inner.executing.len(),
                "Shutdown timed out with jobs still executing"
            );
        }
        drained
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.shutdown.is_cancelled()
    }

    pub fn executing_jobs(&self) -> Vec<JobKey> {
        self.inner.executing.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn pending_triggers(&self) -> Vec<(JobKey, Trigger)> {
        let mut pending: Vec<_> = self
            .inner
            .triggers
            .lock()
            .iter()
            .map(|(key, trigger)| (key.clone(), trigger.clone()))
            .collect();
        pending.sort_by_key(|(_, trigger)| trigger.fire_at());
        pending
    }

    pub fn pool_stats(&self) -> WorkerPoolStats {
        self.inner.pool.stats()
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
            self.fire_due().await;
        }
        tracing::debug!(instance = %self.instance, "Poll loop stopped");
    }

    fn arm(&self, key: JobKey, trigger: Trigger) {
        self.triggers.lock().insert(key, trigger);
        self.wake.notify_one();
    }

    async fn fire_due(self: &Arc<Self>) {
        let now = Utc::now();
        let mut due: Vec<(JobKey, Trigger)> = self
            .triggers
            .lock()
            .iter()
            .filter(|(key, trigger)| trigger.fire_at() <= now && !self.executing.contains_key(*key))
            .map(|(key, trigger)| (key.clone(), trigger.clone()))
            .collect();
        due.sort_by_key(|(_, trigger)| trigger.fire_at());

        for (key, trigger) in due {
            let Some(permit) = self.pool.try_acquire() else {
                tracing::debug!(instance = %self.instance, "Worker pool saturated, due triggers wait");
                break;
            };
            if let Err(error) = self.fire(key.clone(), trigger, permit).await {
                tracing::warn!(job = %key, error = %error, "Failed to fire trigger");
            }
        }
    }

    async fn fire(self: &Arc<Self>, key: JobKey, trigger: Trigger, permit: WorkerPermit) -> Result<()> {
        let Some(stored) = self.store.find_job(&key).await? else {
            let mut triggers = self.triggers.lock();
            if triggers.get(&key) == Some(&trigger) {
                triggers.remove(&key);
            }
            tracing::warn!(job = %key, "Dropped trigger of a job with no stored definition");
            return Ok(());
        };

        let now = Utc::now();
        let next = trigger.rearm(now);
        self.store
            .save_job(&StoredJob::new(stored.definition.clone(), next.clone()))
            .await?;

        let superseded = {
            let mut triggers = self.triggers.lock();
            if triggers.get(&key) == Some(&trigger) {
                match next {
                    Some(next) => triggers.insert(key.clone(), next),
                    None => triggers.remove(&key),
                };
                None
            } else {
                triggers.get(&key).cloned()
            }
        };
        // Triggered again while the fired trigger was being cleared.
        if let Some(current) = superseded {
            self.store
                .save_job(&StoredJob::new(stored.definition.clone(), Some(current)))
                .await?;
        }

        self.executing.insert(key.clone(), now);
        EngineMetrics::set_jobs_executing(self.executing.len());

        let span = tracing::info_span!(
            "job_execution",
            job = %key,
            kind = %stored.definition.kind,
            attempt = stored.definition.attempt()
        );
        let inner = self.clone();
        self.tracker
            .spawn(inner.execute(stored.definition, permit).instrument(span));
        Ok(())
    }

    async fn execute(self: Arc<Self>, definition: JobDefinition, permit: WorkerPermit) {
        let started = Instant::now();
        let result = self.run_handler(&definition).await;
        let duration = started.elapsed();

        self.executing.remove(&definition.key);
        EngineMetrics::set_jobs_executing(self.executing.len());
        EngineMetrics::record_execution(definition.kind.as_str(), result.is_ok(), duration);

        let outcome = match result {
            Ok(()) => {
                permit.mark_success();
                tracing::info!(duration_ms = duration.as_millis() as u64, "Job succeeded");
                JobOutcome::success(definition, duration)
            }
            Err(error) => {
                permit.mark_failure();
                tracing::warn!(
                    duration_ms = duration.as_millis() as u64,
                    error = %error,
                    retryable = error.retryable,
                    "Job failed"
                );
                JobOutcome::failure(definition, error, duration)
            }
        };

        // A worker slot just freed.
        self.wake.notify_one();
        self.notify(&outcome).await;
    }

    async fn run_handler(&self, definition: &JobDefinition) -> JobResult {
        let handler = self.registry.resolve(definition.kind)?.handler.clone();
        let timeout = handler.timeout().unwrap_or(self.config.default_timeout);
        let ctx = JobContext::new(definition.clone(), self.shutdown.child_token());

        let mut task = tokio::spawn(async move { handler.execute(&ctx).await });
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                Err(JobError::retryable(format!("job panicked: {}", join_error)).with_code("PANIC"))
            }
            Err(_) => {
                task.abort();
                Err(TollgateError::job_timeout(&definition.key, timeout.as_secs()).into())
            }
        }
    }

    async fn notify(&self, outcome: &JobOutcome) {
        let listener = self.listener.read().as_ref().and_then(|weak| weak.upgrade());
        let Some(listener) = listener else {
            tracing::debug!(job = %outcome.key(), "No completion listener installed");
            return;
        };
        if let Err(error) = listener.on_job_completed(outcome).await {
            tracing::error!(
                job = %outcome.key(),
                listener = listener.name(),
                error = %error,
                "Completion listener failed"
            );
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 1000))
}

#[async_trait]
impl JobRuntime for LocalRuntime {
    fn instance_name(&self) -> &str {
        &self.inner.instance
    }

    fn worker_pool_size(&self) -> usize {
        self.inner.pool.size()
    }

    async fn store_job(&self, definition: &JobDefinition, replace: bool) -> Result<()> {
        let existing = self.inner.store.find_job(&definition.key).await?;
        if existing.is_some() && !replace {
            return Err(TollgateError::job_already_exists(&definition.key));
        }
        let trigger = existing.and_then(|job| job.trigger);
        self.inner
            .store
            .save_job(&StoredJob::new(definition.clone(), trigger))
            .await
    }

    async fn job(&self, key: &JobKey) -> Result<Option<JobDefinition>> {
        Ok(self.inner.store.find_job(key).await?.map(|job| job.definition))
    }

    async fn trigger_job(&self, key: &JobKey, delay: Duration) -> Result<()> {
        let stored = self
            .inner
            .store
            .find_job(key)
            .await?
            .ok_or_else(|| TollgateError::job_not_found(key))?;

        let fire_at = Utc::now() + to_chrono(delay);
        // The earliest pending fire time wins; a cron trigger keeps its schedule.
        let trigger = match stored.trigger {
            Some(Trigger::Cron {
                expression,
                next_fire_at,
            }) => Trigger::Cron {
                expression,
                next_fire_at: next_fire_at.min(fire_at),
            },
            Some(Trigger::Once { fire_at: pending }) => Trigger::once(pending.min(fire_at)),
            None => Trigger::once(fire_at),
        };

        self.inner
            .store
            .save_job(&StoredJob::new(stored.definition, Some(trigger.clone())))
            .await?;
        self.inner.arm(key.clone(), trigger);

        tracing::debug!(job = %key, delay_ms = delay.as_millis() as u64, "Job triggered");
        Ok(())
    }

    async fn schedule_recurring(
        &self,
        definition: &JobDefinition,
        schedule: &CronSchedule,
    ) -> Result<()> {
        let trigger = Trigger::cron(schedule)?;
        self.inner
            .store
            .save_job(&StoredJob::new(definition.clone(), Some(trigger.clone())))
            .await?;
        self.inner.arm(definition.key.clone(), trigger);

        tracing::info!(job = %definition.key, cron = %schedule, "Recurring job scheduled");
        Ok(())
    }

    async fn unschedule(&self, key: &JobKey) -> Result<bool> {
        let removed = self.inner.store.delete_job(key).await?;
        self.inner.triggers.lock().remove(key);
        if removed {
            tracing::info!(job = %key, "Job unscheduled");
        }
        Ok(removed)
    }

    async fn eligible_trigger_count(&self, lookahead: Duration) -> Result<usize> {
        let horizon = Utc::now() + to_chrono(lookahead);
        let executing = self.inner.executing.len();
        let imminent = self
            .inner
            .triggers
            .lock()
            .iter()
            .filter(|(key, trigger)| {
                trigger.fire_at() <= horizon && !self.inner.executing.contains_key(*key)
            })
            .count();
        Ok(executing + imminent)
    }

    fn set_completion_listener(&self, listener: Weak<dyn CompletionListener>) {
        *self.inner.listener.write() = Some(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobKind, PriorityTable};
    use crate::store::InMemoryStore;

    fn runtime(store: Arc<InMemoryStore>) -> LocalRuntime {
        LocalRuntime::new(
            "test",
            RuntimeConfig::default(),
            store,
            Arc::new(JobRegistry::new(PriorityTable::standard())),
        )
    }

    fn definition(name: &str) -> JobDefinition {
        JobDefinition::new(
            JobKey::new(name, "mirror"),
            JobKind::MirrorExtension,
            serde_json::Value::Null,
        )
    }

    #[tokio::test]
    async fn test_store_job_without_replace() {
        let runtime = runtime(InMemoryStore::arc());
        let job = definition("a");

        runtime.store_job(&job, false).await.unwrap();
        let err = runtime.store_job(&job, false).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobAlreadyExists);
        runtime.store_job(&job, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_missing_job() {
        let runtime = runtime(InMemoryStore::arc());
        let err = runtime
            .trigger_job(&JobKey::new("ghost", "mirror"), Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobNotFound);
    }

    #[tokio::test]
    async fn test_store_job_keeps_pending_trigger() {
        let store = InMemoryStore::arc();
        let runtime = runtime(store.clone());
        let job = definition("a");

        runtime.schedule_now(&job, Duration::from_secs(60)).await.unwrap();
        runtime.store_job(&job.next_attempt(), true).await.unwrap();

        let stored = store.find_job(&job.key).await.unwrap().unwrap();
        assert!(stored.trigger.is_some());
    }

    #[tokio::test]
    async fn test_eligible_count_respects_lookahead() {
        let runtime = runtime(InMemoryStore::arc());
        runtime
            .schedule_now(&definition("soon"), Duration::from_secs(1))
            .await
            .unwrap();
        runtime
            .schedule_now(&definition("later"), Duration::from_secs(600))
            .await
            .unwrap();

        let count = runtime
            .eligible_trigger_count(Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_trigger_keeps_earliest_fire_time() {
        let runtime = runtime(InMemoryStore::arc());
        let job = definition("a");
        runtime.schedule_now(&job, Duration::from_secs(1)).await.unwrap();
        runtime.trigger_job(&job.key, Duration::from_secs(600)).await.unwrap();

        let (_, trigger) = runtime.pending_triggers().remove(0);
        assert!(trigger.fire_at() <= Utc::now() + chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_start_restores_armed_jobs() {
        let store = InMemoryStore::arc();
        let first = runtime(store.clone());
        first
            .schedule_now(&definition("a"), Duration::from_secs(600))
            .await
            .unwrap();

        let second = runtime(store);
        assert_eq!(second.start().await.unwrap(), 1);
        assert_eq!(second.pending_triggers().len(), 1);
        assert!(second.start().await.is_err());
        assert!(second.shutdown().await);
    }

    #[tokio::test]
    async fn test_unschedule() {
        let runtime = runtime(InMemoryStore::arc());
        let job = definition("a");
        runtime.schedule_now(&job, Duration::from_secs(600)).await.unwrap();

        assert!(runtime.unschedule(&job.key).await.unwrap());
        assert!(runtime.pending_triggers().is_empty());
        assert!(!runtime.unschedule(&job.key).await.unwrap());
    }
}
