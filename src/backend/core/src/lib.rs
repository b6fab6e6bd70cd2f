#![allow(clippy::result_large_err)]
//! # Tollgate Core
//!
//! Admission-controlled job orchestration over a shared durable store.
//!
//! ## Architecture
//!
//! - **Jobs**: admission queue, chain and retry coordinators, recurring job
//!   registry and the execution runtime they drive
//! - **Store**: durable access contract with in-memory and Postgres backends
//! - **Database**: Postgres pool, embedded migrations and health checks
//! - **Telemetry**: structured logging, optional OTLP tracing and Prometheus metrics
//! - **Config**: layered file + environment configuration

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod store;
pub mod telemetry;

pub use error::{ErrorClass, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, TollgateError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, EngineConfig, RecurringJobConfig, RuntimeConfig};
    pub use crate::error::{ErrorClass, ErrorCode, Result, TollgateError};
    pub use crate::jobs::{
        CompletionListener, DispatchOutcome, InstallOutcome, JobContext, JobDefinition, JobError,
        JobHandler, JobKey, JobKind, JobOutcome, JobRegistry, JobResult, JobRuntime, LocalRuntime,
        PriorityTable, RecordingRuntime, SchedulingEngine, StepOutcome, SubmitOutcome,
    };
    pub use crate::store::{EngineStore, EntryState, InMemoryStore, PostgresStore};
}
