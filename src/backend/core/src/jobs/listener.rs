//! Completion pipeline: routes every finished execution through the
//! coordinators.
//!
//! Stage order is fixed by the pipeline's fields:
//!
//! 1. **Retry** decides whether a failed job goes back to the queue.
//! 2. **Chain** hands off to successors, only for jobs that succeeded and
//!    are not being retried.
//! 3. **Dispatch** runs an admission pass for the capacity just freed.
//! 4. Extra listeners registered by the application.
//!
//! A failing stage is logged and the remaining stages still run.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::Instrument;

use super::chain::ChainCoordinator;
use super::queue::{DispatchOutcome, JobQueue};
use super::retry::{RetryCoordinator, RetryDecision};
use super::{JobKey, JobOutcome};
use crate::error::Result;

/// Receives the outcome of every job execution.
#[async_trait]
pub trait CompletionListener: Send + Sync {
    fn name(&self) -> &str;

    async fn on_job_completed(&self, outcome: &JobOutcome) -> Result<()>;
}

/// What the pipeline did with one completion.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// `None` when the retry stage failed
    pub retry: Option<RetryDecision>,
    pub handoffs: Vec<JobKey>,
    /// `None` when the dispatch stage failed
    pub dispatch: Option<DispatchOutcome>,
    /// Stages that failed, by name
    pub failed_stages: Vec<&'static str>,
}

pub struct CompletionPipeline {
    retry: Arc<RetryCoordinator>,
    chain: Arc<ChainCoordinator>,
    queue: Arc<JobQueue>,
    extra: RwLock<Vec<Arc<dyn CompletionListener>>>,
}

impl CompletionPipeline {
    pub fn new(
        retry: Arc<RetryCoordinator>,
        chain: Arc<ChainCoordinator>,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            retry,
            chain,
            queue,
            extra: RwLock::new(Vec::new()),
        }
    }

    /// Append a listener that runs after the built-in stages.
    pub fn add_listener(&self, listener: Arc<dyn CompletionListener>) {
        tracing::debug!(listener = listener.name(), "Completion listener added");
        self.extra.write().push(listener);
    }

    pub async fn process(&self, outcome: &JobOutcome) -> PipelineReport {
        let key = outcome.key();
        let mut report = PipelineReport::default();

        // ─────────────────────────────────────────────────────────────────────
        // Retry
        // ─────────────────────────────────────────────────────────────────────

        match self.retry.on_job_completed(outcome).await {
            Ok(decision) => report.retry = Some(decision),
            Err(error) => {
                tracing::error!(job = %key, error = %error, "Retry stage failed");
                report.failed_stages.push("retry");
            }
        }

        // ─────────────────────────────────────────────────────────────────────
        // Chain
        // ─────────────────────────────────────────────────────────────────────

        let resubmitted = report.retry.is_some_and(|decision| decision.is_resubmitted());
        let advance = outcome.succeeded() && !resubmitted;
        match self.chain.advance(key, advance).await {
            Ok(handoffs) => report.handoffs = handoffs,
            Err(error) => {
                tracing::error!(job = %key, error = %error, "Chain stage failed");
                report.failed_stages.push("chain");
            }
        }

        // ─────────────────────────────────────────────────────────────────────
        // Dispatch
        // ─────────────────────────────────────────────────────────────────────

        match self.queue.dispatch().await {
            Ok(dispatch) => report.dispatch = Some(dispatch),
            Err(error) => {
                tracing::error!(job = %key, queue = self.queue.name(), error = %error, "Dispatch stage failed");
                report.failed_stages.push("dispatch");
            }
        }

        let extra: Vec<_> = self.extra.read().clone();
        for listener in extra {
            if let Err(error) = listener.on_job_completed(outcome).await {
                tracing::error!(job = %key, listener = listener.name(), error = %error, "Completion listener failed");
                report.failed_stages.push("listener");
            }
        }

        report
    }
}

#[async_trait]
impl CompletionListener for CompletionPipeline {
    fn name(&self) -> &str {
        "completion_pipeline"
    }

    async fn on_job_completed(&self, outcome: &JobOutcome) -> Result<()> {
        let span = tracing::info_span!(
            "job_completed",
            job = %outcome.key(),
            succeeded = outcome.succeeded()
        );
        self.process(outcome).instrument(span).await;
        Ok(())
    }
}
