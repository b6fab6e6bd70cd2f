//! Retry coordinator: resubmits failed jobs under their own identity.

use serde::Serialize;
use std::sync::Arc;

use super::queue::JobQueue;
use super::registry::JobRegistry;
use super::runtime::JobRuntime;
use super::JobOutcome;
use crate::error::Result;
use crate::telemetry::EngineMetrics;

/// What the coordinator did with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetryDecision {
    /// The job succeeded
    NotNeeded,
    /// The job failed and carries no retry metadata
    NoMetadata,
    /// The retry budget is spent
    Exhausted { retries: u32, max_retries: u32 },
    /// The job was submitted again
    Resubmitted { retries: u32, max_retries: u32 },
}

impl RetryDecision {
    pub fn is_resubmitted(&self) -> bool {
        matches!(self, Self::Resubmitted { .. })
    }
}

pub struct RetryCoordinator {
    runtime: Arc<dyn JobRuntime>,
    queue: Arc<JobQueue>,
    registry: Arc<JobRegistry>,
}

impl RetryCoordinator {
    pub fn new(runtime: Arc<dyn JobRuntime>, queue: Arc<JobQueue>, registry: Arc<JobRegistry>) -> Self {
        Self {
            runtime,
            queue,
            registry,
        }
    }

    pub async fn on_job_completed(&self, outcome: &JobOutcome) -> Result<RetryDecision> {
        let Some(error) = &outcome.error else {
            return Ok(RetryDecision::NotNeeded);
        };
        let definition = &outcome.definition;

        let Some(retry) = definition.retry else {
            tracing::warn!(
                job = %definition.key,
                kind = %definition.kind,
                error = %error,
                "Job failed without retry metadata"
            );
            return Ok(RetryDecision::NoMetadata);
        };

        if !retry.can_retry() {
            EngineMetrics::record_retry_exhausted(definition.kind.as_str());
            tracing::error!(
                job = %definition.key,
                kind = %definition.kind,
                retries = retry.retries,
                max_retries = retry.max_retries,
                error = %error,
                "Job retries exhausted"
            );
            return Ok(RetryDecision::Exhausted {
                retries: retry.retries,
                max_retries: retry.max_retries,
            });
        }

        let next = definition.next_attempt();
        self.runtime.store_job(&next, true).await?;
        self.queue
            .submit(&next.key, self.registry.priority(next.kind), true)
            .await?;

        let retry = retry.next();
        EngineMetrics::record_retry(definition.kind.as_str());
        tracing::info!(
            job = %definition.key,
            transient = error.retryable,
            retries = retry.retries,
            max_retries = retry.max_retries,
            error = %error,
            "Job resubmitted for retry"
        );
        Ok(RetryDecision::Resubmitted {
            retries: retry.retries,
            max_retries: retry.max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::runtime::RecordingRuntime;
    use crate::jobs::{JobDefinition, JobError, JobKey, JobKind, PriorityTable};
    use crate::store::InMemoryStore;
    use std::time::Duration;

    fn coordinator() -> (Arc<RecordingRuntime>, RetryCoordinator) {
        let store = InMemoryStore::arc();
        let runtime = RecordingRuntime::arc("test", 4);
        let queue = Arc::new(JobQueue::new("default", store, runtime.clone()));
        let registry = Arc::new(JobRegistry::new(PriorityTable::standard()));
        let retry = RetryCoordinator::new(runtime.clone(), queue, registry);
        (runtime, retry)
    }

    fn definition(max_retries: u32) -> JobDefinition {
        JobDefinition::new(
            JobKey::new("ext-1", "publish"),
            JobKind::PublishExtension,
            serde_json::json!({"extension": 1}),
        )
        .with_max_retries(max_retries)
    }

    #[tokio::test]
    async fn test_success_needs_no_retry() {
        let (_, retry) = coordinator();
        let outcome = JobOutcome::success(definition(3), Duration::ZERO);
        assert_eq!(retry.on_job_completed(&outcome).await.unwrap(), RetryDecision::NotNeeded);
    }

    #[tokio::test]
    async fn test_failure_resubmits_with_incremented_counter() {
        let (runtime, retry) = coordinator();
        let job = definition(3);
        runtime.store_job(&job, true).await.unwrap();

        let outcome = JobOutcome::failure(job.clone(), JobError::retryable("boom"), Duration::ZERO);
        let decision = retry.on_job_completed(&outcome).await.unwrap();
        assert_eq!(decision, RetryDecision::Resubmitted { retries: 1, max_retries: 3 });

        let stored = runtime.definition(&job.key).unwrap();
        assert_eq!(stored.retry.unwrap().retries, 1);
        assert_eq!(runtime.released(), vec![job.key]);
    }

    #[tokio::test]
    async fn test_exhausted() {
        let (runtime, retry) = coordinator();
        let mut job = definition(3);
        job.retry = job.retry.map(|r| r.next().next().next());

        let outcome = JobOutcome::failure(job, JobError::retryable("boom"), Duration::ZERO);
        let decision = retry.on_job_completed(&outcome).await.unwrap();
        assert_eq!(decision, RetryDecision::Exhausted { retries: 3, max_retries: 3 });
        assert!(runtime.released().is_empty());
    }

    #[tokio::test]
    async fn test_no_metadata() {
        let (runtime, retry) = coordinator();
        let mut bare = definition(3);
        bare.retry = None;

        let outcome = JobOutcome::failure(bare, JobError::retryable("boom"), Duration::ZERO);
        assert_eq!(retry.on_job_completed(&outcome).await.unwrap(), RetryDecision::NoMetadata);
        assert!(runtime.released().is_empty());
    }

    #[tokio::test]
    async fn test_non_transient_failure_still_resubmitted() {
        let (runtime, retry) = coordinator();
        let job = definition(3);
        runtime.store_job(&job, true).await.unwrap();

        let outcome = JobOutcome::failure(job.clone(), JobError::fatal("bad payload"), Duration::ZERO);
        let decision = retry.on_job_completed(&outcome).await.unwrap();
        assert_eq!(decision, RetryDecision::Resubmitted { retries: 1, max_retries: 3 });
        assert_eq!(runtime.released(), vec![job.key]);
    }
}
