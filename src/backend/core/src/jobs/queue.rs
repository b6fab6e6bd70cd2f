//! Admission controller.
//!
//! Jobs submitted to a [`JobQueue`] are held as durable WAITING entries and
//! released to the runtime only while the worker pool has spare capacity.
//! Every submission and every job completion ends with a dispatch pass.
//!
//! # Dispatch pass
//!
//! ```text
//! busy     = executing jobs + triggers due within the look-ahead window
//! capacity = worker_pool_size - busy            (stop when <= 0)
//! entries  = up to `capacity` WAITING entries, ascending (priority, sequence)
//! for each entry: trigger after release_delay, then mark COMPLETE
//! ```
//!
//! Passes are serialized by a lock owned by the queue. Capacity consumed by
//! jobs outside this queue during a pass is not re-checked; the next pass
//! corrects for it.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::runtime::JobRuntime;
use super::JobKey;
use crate::error::{ErrorCode, Result};
use crate::store::{EngineStore, EntryState};
use crate::telemetry::EngineMetrics;

/// What a submission did to the queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// New WAITING entry
    Inserted,
    /// Already WAITING; left untouched
    Skipped,
    /// Entry had been released before and is WAITING again
    Requeued,
    /// Reset to WAITING on request
    Replaced,
}

impl SubmitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Skipped => "skipped",
            Self::Requeued => "requeued",
            Self::Replaced => "replaced",
        }
    }
}

/// Result of one dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Jobs handed to the runtime, in release order
    Released { keys: Vec<JobKey> },
    /// Worker pool is full; entries keep waiting
    NoCapacity {
        running_or_imminent: usize,
        waiting: u64,
    },
    /// Capacity available but nothing is waiting
    Idle,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Released { .. } => "released",
            Self::NoCapacity { .. } => "no_capacity",
            Self::Idle => "idle",
        }
    }

    pub fn released(&self) -> &[JobKey] {
        match self {
            Self::Released { keys } => keys,
            _ => &[],
        }
    }
}

/// Snapshot of a queue and the capacity it sees.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queue: String,
    pub instance: String,
    pub waiting: u64,
    pub complete: u64,
    pub worker_pool_size: usize,
    pub running_or_imminent: usize,
    pub free_capacity: i64,
}

impl QueueStats {
    /// Entries are waiting while no worker is free.
    pub fn is_starved(&self) -> bool {
        self.waiting > 0 && self.free_capacity <= 0
    }
}

pub struct JobQueue {
    name: String,
    store: Arc<dyn EngineStore>,
    runtime: Arc<dyn JobRuntime>,
    lookahead: Duration,
    release_delay: Duration,
    dispatch_lock: Mutex<()>,
}

impl JobQueue {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn EngineStore>,
        runtime: Arc<dyn JobRuntime>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            runtime,
            lookahead: Duration::from_secs(300),
            release_delay: Duration::from_millis(500),
            dispatch_lock: Mutex::new(()),
        }
    }

    pub fn with_lookahead(mut self, lookahead: Duration) -> Self {
        self.lookahead = lookahead;
        self
    }

    pub fn with_release_delay(mut self, release_delay: Duration) -> Self {
        self.release_delay = release_delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admit `key` at `priority`, then run a dispatch pass.
    ///
    /// The job's definition must already be stored in the runtime.
    ///
    /// # Errors
    ///
    /// Store failures and errors of the dispatch pass are returned; the entry
    /// stays WAITING in the latter case.
    pub async fn submit(&self, key: &JobKey, priority: i32, replace: bool) -> Result<SubmitOutcome> {
        let instance = self.runtime.instance_name();

        let outcome = match self.store.find_queue_entry(instance, &self.name, key).await? {
            None => match self
                .store
                .insert_queue_entry(instance, &self.name, key, priority)
                .await
            {
                Ok(_) => SubmitOutcome::Inserted,
                // Lost a race with a concurrent submission of the same key.
                Err(error) if error.code() == ErrorCode::DuplicateRecord => SubmitOutcome::Skipped,
                Err(error) => return Err(error),
            },
            Some(entry) if replace => {
                self.store.reset_queue_entry(entry.id, priority).await?;
                SubmitOutcome::Replaced
            }
            Some(entry) if entry.state == EntryState::Waiting => SubmitOutcome::Skipped,
            Some(entry) => {
                self.store.reset_queue_entry(entry.id, priority).await?;
                SubmitOutcome::Requeued
            }
        };

        EngineMetrics::record_submission(outcome.as_str());
        if outcome == SubmitOutcome::Skipped {
            tracing::debug!(queue = %self.name, job = %key, "Job already waiting, submission skipped");
        } else {
            tracing::info!(
                queue = %self.name,
                job = %key,
                priority,
                outcome = outcome.as_str(),
                "Job submitted"
            );
        }

        self.dispatch().await?;
        Ok(outcome)
    }

    /// Release as many WAITING entries as there is free capacity.
    pub async fn dispatch(&self) -> Result<DispatchOutcome> {
        let _guard = self.dispatch_lock.lock().await;
        let instance = self.runtime.instance_name();

        let busy = self.runtime.eligible_trigger_count(self.lookahead).await?;
        let capacity = self.runtime.worker_pool_size() as i64 - busy as i64;
        EngineMetrics::set_capacity_free(capacity);

        if capacity <= 0 {
            let counts = self.store.queue_counts(instance, &self.name).await?;
            EngineMetrics::set_queue_waiting(&self.name, counts.waiting);
            EngineMetrics::record_dispatch(&self.name, "no_capacity", 0);
            if counts.waiting > 0 {
                tracing::debug!(
                    queue = %self.name,
                    running_or_imminent = busy,
                    waiting = counts.waiting,
                    "No free capacity, entries keep waiting"
                );
            }
            return Ok(DispatchOutcome::NoCapacity {
                running_or_imminent: busy,
                waiting: counts.waiting,
            });
        }

        let entries = self
            .store
            .fetch_waiting(instance, &self.name, capacity as usize)
            .await?;
        if entries.is_empty() {
            EngineMetrics::set_queue_waiting(&self.name, 0);
            EngineMetrics::record_dispatch(&self.name, "idle", 0);
            return Ok(DispatchOutcome::Idle);
        }

        let mut released = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Err(error) = self.runtime.trigger_job(&entry.key, self.release_delay).await {
                EngineMetrics::record_dispatch(&self.name, "failed", released.len());
                tracing::warn!(
                    queue = %self.name,
                    job = %entry.key,
                    error = %error,
                    "Runtime rejected release, entry stays waiting"
                );
                return Err(error);
            }
            self.store.complete_queue_entry(entry.id).await?;
            tracing::debug!(queue = %self.name, job = %entry.key, priority = entry.priority, "Job released");
            released.push(entry.key);
        }

        let counts = self.store.queue_counts(instance, &self.name).await?;
        EngineMetrics::set_queue_waiting(&self.name, counts.waiting);
        EngineMetrics::record_dispatch(&self.name, "released", released.len());
        tracing::info!(
            queue = %self.name,
            released = released.len(),
            capacity,
            waiting = counts.waiting,
            "Dispatch pass released jobs"
        );

        Ok(DispatchOutcome::Released { keys: released })
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let instance = self.runtime.instance_name();
        let counts = self.store.queue_counts(instance, &self.name).await?;
        let running_or_imminent = self.runtime.eligible_trigger_count(self.lookahead).await?;
        let worker_pool_size = self.runtime.worker_pool_size();

        Ok(QueueStats {
            queue: self.name.clone(),
            instance: instance.to_string(),
            waiting: counts.waiting,
            complete: counts.complete,
            worker_pool_size,
            running_or_imminent,
            free_capacity: worker_pool_size as i64 - running_or_imminent as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::runtime::RecordingRuntime;
    use crate::jobs::{JobDefinition, JobKind};
    use crate::store::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        runtime: Arc<RecordingRuntime>,
        queue: JobQueue,
    }

    fn fixture(pool_size: usize) -> Fixture {
        let store = InMemoryStore::arc();
        let runtime = RecordingRuntime::arc("test", pool_size);
        let queue = JobQueue::new("default", store.clone(), runtime.clone());
        Fixture {
            store,
            runtime,
            queue,
        }
    }

    async fn stored(runtime: &RecordingRuntime, name: &str) -> JobKey {
        let key = JobKey::new(name, "mirror");
        runtime
            .store_job(
                &JobDefinition::new(key.clone(), JobKind::MirrorExtension, serde_json::Value::Null),
                true,
            )
            .await
            .unwrap();
        key
    }

    #[tokio::test]
    async fn test_submit_releases_when_capacity_free() {
        let f = fixture(2);
        let key = stored(&f.runtime, "a").await;

        let outcome = f.queue.submit(&key, 5, false).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Inserted);
        assert_eq!(f.runtime.released(), vec![key.clone()]);

        let entry = f
            .store
            .find_queue_entry("test", "default", &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.state, EntryState::Complete);
    }

    #[tokio::test]
    async fn test_no_capacity_keeps_waiting() {
        let f = fixture(1);
        f.runtime.set_busy(1);
        let key = stored(&f.runtime, "a").await;

        f.queue.submit(&key, 5, false).await.unwrap();
        assert!(f.runtime.released().is_empty());

        let outcome = f.queue.dispatch().await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::NoCapacity {
                running_or_imminent: 1,
                waiting: 1
            }
        );
        assert!(f.queue.stats().await.unwrap().is_starved());
    }

    #[tokio::test]
    async fn test_waiting_duplicate_is_skipped() {
        let f = fixture(1);
        f.runtime.set_busy(1);
        let key = stored(&f.runtime, "a").await;

        assert_eq!(f.queue.submit(&key, 5, false).await.unwrap(), SubmitOutcome::Inserted);
        assert_eq!(f.queue.submit(&key, 1, false).await.unwrap(), SubmitOutcome::Skipped);

        let entry = f
            .store
            .find_queue_entry("test", "default", &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.priority, 5);
    }

    #[tokio::test]
    async fn test_released_entry_requeued() {
        let f = fixture(1);
        let key = stored(&f.runtime, "a").await;

        f.queue.submit(&key, 5, false).await.unwrap();
        f.runtime.complete(&key, Ok(())).await.unwrap();

        assert_eq!(f.queue.submit(&key, 5, false).await.unwrap(), SubmitOutcome::Requeued);
        assert_eq!(f.runtime.released().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_definition_propagates() {
        let f = fixture(2);
        let key = JobKey::new("ghost", "mirror");

        let err = f.queue.submit(&key, 5, false).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobNotFound);

        let entry = f
            .store
            .find_queue_entry("test", "default", &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.state, EntryState::Waiting);
    }

    #[tokio::test]
    async fn test_idle_dispatch() {
        let f = fixture(2);
        assert_eq!(f.queue.dispatch().await.unwrap(), DispatchOutcome::Idle);
    }

    #[tokio::test]
    async fn test_store_outage_aborts_pass() {
        let f = fixture(2);
        f.store.set_offline(true);
        let err = f.queue.dispatch().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StoreConnectionFailed);
    }
}
