//! The scheduling engine: one value owning every coordinator.
//!
//! Construct it once at process start and hand `Arc<SchedulingEngine>` to job
//! producers. Constructing the engine installs its completion pipeline as the
//! runtime's listener.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::chain::ChainCoordinator;
use super::listener::{CompletionListener, CompletionPipeline};
use super::queue::{DispatchOutcome, JobQueue, QueueStats, SubmitOutcome};
use super::recurring::{InstallOutcome, RecurringJobRegistry, SyncReport};
use super::registry::JobRegistry;
use super::retry::RetryCoordinator;
use super::runtime::JobRuntime;
use super::{JobDefinition, JobKey, JobKind};
use crate::config::{EngineConfig, RecurringJobConfig};
use crate::error::Result;
use crate::store::{ChainLink, EngineStore, EntryState, RecurringBinding};

/// How a pipeline step was scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scheduled", rename_all = "snake_case")]
pub enum StepOutcome {
    /// No predecessor: admitted through the queue
    Enqueued { outcome: SubmitOutcome },
    /// Released when the predecessor succeeds
    Chained { link_id: i64 },
}

pub struct SchedulingEngine {
    config: EngineConfig,
    store: Arc<dyn EngineStore>,
    runtime: Arc<dyn JobRuntime>,
    registry: Arc<JobRegistry>,
    queue: Arc<JobQueue>,
    chain: Arc<ChainCoordinator>,
    recurring: RecurringJobRegistry,
    pipeline: Arc<CompletionPipeline>,
}

impl SchedulingEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn EngineStore>,
        runtime: Arc<dyn JobRuntime>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        let queue = Arc::new(
            JobQueue::new(config.queue_name.clone(), store.clone(), runtime.clone())
                .with_lookahead(config.lookahead)
                .with_release_delay(config.release_delay),
        );
        let chain = Arc::new(ChainCoordinator::new(store.clone(), runtime.clone()));
        let retry = Arc::new(RetryCoordinator::new(
            runtime.clone(),
            queue.clone(),
            registry.clone(),
        ));
        let recurring = RecurringJobRegistry::new(store.clone(), runtime.clone(), registry.clone());
        let pipeline = Arc::new(CompletionPipeline::new(retry, chain.clone(), queue.clone()));

        let listener: Arc<dyn CompletionListener> = pipeline.clone();
        runtime.set_completion_listener(Arc::downgrade(&listener));

        tracing::info!(
            instance = runtime.instance_name(),
            queue = %config.queue_name,
            workers = runtime.worker_pool_size(),
            "Scheduling engine ready"
        );

        Self {
            config,
            store,
            runtime,
            registry,
            queue,
            chain,
            recurring,
            pipeline,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Producers
    // ═══════════════════════════════════════════════════════════════════════════

    /// Admit a job at its kind's priority.
    pub async fn enqueue(&self, definition: JobDefinition) -> Result<SubmitOutcome> {
        let priority = self.registry.resolve(definition.kind)?.priority;
        self.enqueue_with_priority(definition, priority).await
    }

    /// Admit a job at an explicit priority.
    pub async fn enqueue_with_priority(
        &self,
        definition: JobDefinition,
        priority: i32,
    ) -> Result<SubmitOutcome> {
        let span = tracing::info_span!("enqueue", job = %definition.key, priority);
        async {
            self.registry.resolve(definition.kind)?;

            let previous = self.runtime.job(&definition.key).await?;
            let waiting = self
                .store
                .find_queue_entry(self.runtime.instance_name(), self.queue.name(), &definition.key)
                .await?
                .is_some_and(|entry| entry.state == EntryState::Waiting);

            // The definition is stored before its entry so a WAITING entry
            // always has a job to release. A job already waiting keeps the
            // definition it was admitted with.
            match previous {
                Some(_) if waiting => {
                    tracing::debug!("Job already waiting, stored definition kept");
                }
                Some(previous) => {
                    let definition = definition.clone().carry_retries_from(&previous);
                    self.runtime.store_job(&definition, true).await?;
                }
                None => self.runtime.store_job(&definition, true).await?,
            }
            self.queue.submit(&definition.key, priority, false).await
        }
        .instrument(span)
        .await
    }

    /// Release `second` when `first` succeeds.
    pub async fn chain(
        &self,
        chain: &str,
        first: &JobKey,
        second: JobDefinition,
    ) -> Result<ChainLink> {
        let span = tracing::info_span!("chain", chain, job = %first, second = %second.key);
        async {
            self.registry.resolve(second.kind)?;
            self.chain.link(chain, first, &second).await
        }
        .instrument(span)
        .await
    }

    /// Schedule one step of a pipeline: chained behind `previous`, or queued
    /// directly when it is the first step.
    pub async fn schedule_step(
        &self,
        chain: &str,
        previous: Option<&JobKey>,
        definition: JobDefinition,
    ) -> Result<StepOutcome> {
        match previous {
            Some(previous) => {
                let link = self.chain(chain, previous, definition).await?;
                Ok(StepOutcome::Chained { link_id: link.id })
            }
            None => {
                let outcome = self.enqueue(definition).await?;
                Ok(StepOutcome::Enqueued { outcome })
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Recurring jobs
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn install_recurring(
        &self,
        name: &str,
        cron: &str,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Result<InstallOutcome> {
        self.recurring
            .install(name, cron, kind, payload)
            .instrument(tracing::info_span!("install_recurring", name, cron))
            .await
    }

    pub async fn uninstall_recurring(&self, name: &str) -> Result<bool> {
        self.recurring
            .uninstall(name)
            .instrument(tracing::info_span!("uninstall_recurring", name))
            .await
    }

    pub async fn sync_recurring(&self, configs: &[RecurringJobConfig]) -> Result<SyncReport> {
        self.recurring.sync(configs).await
    }

    pub async fn recurring_jobs(&self) -> Result<Vec<RecurringBinding>> {
        self.recurring.list().await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Admission
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn dispatch(&self) -> Result<DispatchOutcome> {
        self.queue
            .dispatch()
            .instrument(tracing::info_span!("dispatch", queue = self.queue.name()))
            .await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    /// Run a dispatch pass every `interval` until `shutdown` is cancelled.
    ///
    /// Entries left WAITING by a failed pass are retried here even when no
    /// job completes.
    pub fn spawn_dispatch_ticker(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(error) = engine.dispatch().await {
                            tracing::warn!(error = %error, "Periodic dispatch pass failed");
                        }
                    }
                }
            }
            tracing::debug!("Dispatch ticker stopped");
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════════

    /// Append a listener notified after the built-in completion stages.
    pub fn add_listener(&self, listener: Arc<dyn CompletionListener>) {
        self.pipeline.add_listener(listener);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EngineStore> {
        &self.store
    }

    pub fn runtime(&self) -> &Arc<dyn JobRuntime> {
        &self.runtime
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn chains(&self) -> &Arc<ChainCoordinator> {
        &self.chain
    }

    pub fn pipeline(&self) -> &Arc<CompletionPipeline> {
        &self.pipeline
    }
}
