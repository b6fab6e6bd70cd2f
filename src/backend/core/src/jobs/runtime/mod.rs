//! Execution runtime boundary.
//!
//! The engine never runs job bodies itself. It asks a [`JobRuntime`] to store
//! definitions, fire them, and report how busy the worker pool is; the runtime
//! reports every finished execution back through a [`CompletionListener`].

pub mod local;
pub mod recording;

pub use local::LocalRuntime;
pub use recording::RecordingRuntime;

use async_trait::async_trait;
use std::sync::Weak;
use std::time::Duration;

use super::listener::CompletionListener;
use super::{CronSchedule, JobDefinition, JobKey};
use crate::error::Result;

/// Operations the engine consumes from the execution runtime.
#[async_trait]
pub trait JobRuntime: Send + Sync {
    /// Identity of the scheduling process; scopes queue entries and chain
    /// links in the durable store.
    fn instance_name(&self) -> &str;

    /// Number of jobs that may execute at once.
    fn worker_pool_size(&self) -> usize;

    /// Persist a job definition without firing it.
    ///
    /// A pending trigger of an existing job is kept. Fails with
    /// `JobAlreadyExists` when the job exists and `replace` is false.
    async fn store_job(&self, definition: &JobDefinition, replace: bool) -> Result<()>;

    /// The stored definition, if any.
    async fn job(&self, key: &JobKey) -> Result<Option<JobDefinition>>;

    /// Fire a stored job after `delay`.
    ///
    /// Fails with `JobNotFound` when no definition is stored under `key`.
    async fn trigger_job(&self, key: &JobKey, delay: Duration) -> Result<()>;

    /// Store `definition` (replacing any previous one) and fire it after `delay`.
    async fn schedule_now(&self, definition: &JobDefinition, delay: Duration) -> Result<()> {
        self.store_job(definition, true).await?;
        self.trigger_job(&definition.key, delay).await
    }

    /// Store `definition` and fire it on every tick of `schedule`.
    async fn schedule_recurring(
        &self,
        definition: &JobDefinition,
        schedule: &CronSchedule,
    ) -> Result<()>;

    /// Remove a job and its trigger. Returns false if it did not exist.
    async fn unschedule(&self, key: &JobKey) -> Result<bool>;

    /// Jobs executing now plus triggers due within `lookahead`.
    async fn eligible_trigger_count(&self, lookahead: Duration) -> Result<usize>;

    /// Install the listener notified after every execution.
    fn set_completion_listener(&self, listener: Weak<dyn CompletionListener>);
}
