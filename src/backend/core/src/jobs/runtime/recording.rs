//! Deterministic runtime that records what the engine asks of it.
//!
//! Nothing runs on its own: triggered jobs sit in a pending list until the
//! caller completes them with [`RecordingRuntime::complete`], which delivers
//! the outcome to the completion listener exactly like a real execution.
//! Recurring jobs are recorded but never fire.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::JobRuntime;
use crate::error::{Result, TollgateError};
use crate::jobs::listener::CompletionListener;
use crate::jobs::{CronSchedule, JobDefinition, JobKey, JobOutcome, JobResult};

#[derive(Default)]
struct State {
    jobs: HashMap<JobKey, JobDefinition>,
    pending: BTreeMap<JobKey, DateTime<Utc>>,
    recurring: BTreeMap<JobKey, String>,
    released: Vec<JobKey>,
}

pub struct RecordingRuntime {
    instance: String,
    pool_size: usize,
    busy: AtomicUsize,
    state: Mutex<State>,
    listener: RwLock<Option<Weak<dyn CompletionListener>>>,
}

impl RecordingRuntime {
    pub fn new(instance: impl Into<String>, pool_size: usize) -> Self {
        Self {
            instance: instance.into(),
            pool_size,
            busy: AtomicUsize::new(0),
            state: Mutex::new(State::default()),
            listener: RwLock::new(None),
        }
    }

    pub fn arc(instance: impl Into<String>, pool_size: usize) -> Arc<Self> {
        Arc::new(Self::new(instance, pool_size))
    }

    /// Pretend `busy` workers are occupied by jobs this runtime does not track.
    pub fn set_busy(&self, busy: usize) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    /// Every `trigger_job` call, in order.
    pub fn released(&self) -> Vec<JobKey> {
        self.state.lock().released.clone()
    }

    /// Triggered jobs not yet completed.
    pub fn pending(&self) -> Vec<JobKey> {
        self.state.lock().pending.keys().cloned().collect()
    }

    /// Recurring jobs with their normalized cron expression.
    pub fn recurring(&self) -> Vec<(JobKey, String)> {
        self.state
            .lock()
            .recurring
            .iter()
            .map(|(key, cron)| (key.clone(), cron.clone()))
            .collect()
    }

    pub fn definition(&self, key: &JobKey) -> Option<JobDefinition> {
        self.state.lock().jobs.get(key).cloned()
    }

    /// Finish a job and deliver its outcome to the completion listener.
    ///
    /// Listener errors are returned, unlike a real runtime which only logs them.
    pub async fn complete(&self, key: &JobKey, result: JobResult) -> Result<()> {
        let definition = {
            let mut state = self.state.lock();
            state.pending.remove(key);
            state
                .jobs
                .get(key)
                .cloned()
                .ok_or_else(|| TollgateError::job_not_found(key))?
        };

        let outcome = match result {
            Ok(()) => JobOutcome::success(definition, Duration::ZERO),
            Err(error) => JobOutcome::failure(definition, error, Duration::ZERO),
        };

        let listener = self.listener.read().as_ref().and_then(|weak| weak.upgrade());
        match listener {
            Some(listener) => listener.on_job_completed(&outcome).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl JobRuntime for RecordingRuntime {
    fn instance_name(&self) -> &str {
        &self.instance
    }

    fn worker_pool_size(&self) -> usize {
        self.pool_size
    }

    async fn store_job(&self, definition: &JobDefinition, replace: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.jobs.contains_key(&definition.key) && !replace {
            return Err(TollgateError::job_already_exists(&definition.key));
        }
        state.jobs.insert(definition.key.clone(), definition.clone());
        Ok(())
    }

    async fn job(&self, key: &JobKey) -> Result<Option<JobDefinition>> {
        Ok(self.state.lock().jobs.get(key).cloned())
    }

    async fn trigger_job(&self, key: &JobKey, delay: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if !state.jobs.contains_key(key) {
            return Err(TollgateError::job_not_found(key));
        }
        let fire_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        state.pending.insert(key.clone(), fire_at);
        state.released.push(key.clone());
        Ok(())
    }

    async fn schedule_recurring(
        &self,
        definition: &JobDefinition,
        schedule: &CronSchedule,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.jobs.insert(definition.key.clone(), definition.clone());
        state
            .recurring
            .insert(definition.key.clone(), schedule.as_str().to_string());
        Ok(())
    }

    async fn unschedule(&self, key: &JobKey) -> Result<bool> {
        let mut state = self.state.lock();
        state.pending.remove(key);
        state.recurring.remove(key);
        Ok(state.jobs.remove(key).is_some())
    }

    async fn eligible_trigger_count(&self, lookahead: Duration) -> Result<usize> {
        let horizon = Utc::now()
            + chrono::Duration::from_std(lookahead).unwrap_or_else(|_| chrono::Duration::days(1));
        let imminent = self
            .state
            .lock()
            .pending
            .values()
            .filter(|fire_at| **fire_at <= horizon)
            .count();
        Ok(self.busy.load(Ordering::SeqCst) + imminent)
    }

    fn set_completion_listener(&self, listener: Weak<dyn CompletionListener>) {
        *self.listener.write() = Some(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::JobKind;

    fn definition(name: &str) -> JobDefinition {
        JobDefinition::new(
            JobKey::new(name, "publish"),
            JobKind::PublishExtension,
            serde_json::Value::Null,
        )
    }

    #[tokio::test]
    async fn test_pending_counts_as_eligible() {
        let runtime = RecordingRuntime::new("test", 4);
        runtime.set_busy(1);
        runtime
            .schedule_now(&definition("a"), Duration::from_millis(500))
            .await
            .unwrap();

        assert_eq!(
            runtime.eligible_trigger_count(Duration::from_secs(300)).await.unwrap(),
            2
        );
        assert_eq!(runtime.released(), vec![JobKey::new("a", "publish")]);
    }

    #[tokio::test]
    async fn test_complete_clears_pending() {
        let runtime = RecordingRuntime::new("test", 4);
        let job = definition("a");
        runtime.schedule_now(&job, Duration::ZERO).await.unwrap();

        runtime.complete(&job.key, Ok(())).await.unwrap();
        assert!(runtime.pending().is_empty());
        assert_eq!(
            runtime.eligible_trigger_count(Duration::from_secs(300)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let runtime = RecordingRuntime::new("test", 4);
        let key = JobKey::new("ghost", "publish");

        let err = runtime.trigger_job(&key, Duration::ZERO).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobNotFound);
        assert!(runtime.complete(&key, Ok(())).await.is_err());
    }
}
