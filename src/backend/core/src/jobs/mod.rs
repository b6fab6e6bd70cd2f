//! Job orchestration.
//!
//! Turns a durable backlog of background work into bounded, ordered,
//! retryable execution on a fixed worker pool:
//!
//! - **Queue**: admission control, releasing only as many jobs as there are
//!   free workers, lowest priority value first
//! - **Chain**: "when A succeeds, start B", bypassing admission control
//! - **Retry**: failed jobs go back through the queue under the same key
//! - **Recurring**: idempotent installation of cron-scheduled jobs
//! - **Runtime**: stores definitions, fires triggers, runs handlers and
//!   reports every outcome back through the completion pipeline
//!
//! # Architecture
//!
//! ```text
//!  producers ──enqueue──▶ ┌──────────┐   trigger    ┌───────────────┐
//!                         │ JobQueue │────────────▶ │  JobRuntime   │
//!  producers ──chain────▶ ├──────────┤              │ (WorkerPool)  │
//!                         │  Chain   │────────────▶ │               │
//!                         └──────────┘              └───────┬───────┘
//!                              ▲                            │ outcome
//!                              │                            ▼
//!                         ┌─────────────────────────────────────────┐
//!                         │ CompletionPipeline                      │
//!                         │   Retry ─▶ Chain ─▶ Dispatch ─▶ extras  │
//!                         └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let registry = Arc::new(
//!     JobRegistry::new(PriorityTable::standard())
//!         .register(JobKind::MirrorExtension, Arc::new(MirrorHandler::new(client))),
//! );
//! let runtime = Arc::new(LocalRuntime::new("tollgate", config.runtime, store.clone(), registry.clone()));
//! let engine = Arc::new(SchedulingEngine::new(config.engine, store, runtime.clone(), registry.clone()));
//! runtime.start().await?;
//!
//! let mirror = registry.new_definition(JobKind::MirrorExtension, JobKey::new("redhat.java", "mirror"), payload)?;
//! engine.enqueue(mirror).await?;
//! ```

pub mod chain;
pub mod engine;
pub mod job;
pub mod listener;
pub mod priority;
pub mod queue;
pub mod recurring;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod schedule;
pub mod worker_pool;

pub use chain::ChainCoordinator;
pub use engine::{SchedulingEngine, StepOutcome};
pub use job::{
    JobContext, JobDefinition, JobError, JobHandler, JobKey, JobKind, JobOutcome, JobResult,
    RetryMetadata,
};
pub use listener::{CompletionListener, CompletionPipeline, PipelineReport};
pub use priority::{default_max_retries, default_priority, PriorityTable};
pub use queue::{DispatchOutcome, JobQueue, QueueStats, SubmitOutcome};
pub use recurring::{InstallOutcome, RecurringJobRegistry, SyncReport};
pub use registry::{JobRegistry, RegisteredKind};
pub use retry::{RetryCoordinator, RetryDecision};
pub use runtime::{JobRuntime, LocalRuntime, RecordingRuntime};
pub use schedule::{CronSchedule, Trigger};
pub use worker_pool::{WorkerPermit, WorkerPool, WorkerPoolStats};
