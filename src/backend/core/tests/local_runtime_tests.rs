//! End-to-end tests of the engine on the in-process runtime.
//!
//! Tests cover:
//! - Execution of enqueued jobs on the worker pool
//! - Concurrency bounded by the pool size
//! - Retry of failing handlers until success
//! - Retry of panicking handlers
//! - Chain hand-off between real handlers
//! - Handler timeouts
//! - Restart recovery of persisted triggers
//! - Graceful shutdown

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tollgate_core::config::{EngineConfig, RuntimeConfig};
use tollgate_core::jobs::{
    CompletionListener, JobContext, JobDefinition, JobError, JobHandler, JobKey, JobKind,
    JobOutcome, JobRegistry, JobResult, JobRuntime, LocalRuntime, PriorityTable,
    SchedulingEngine,
};
use tollgate_core::store::{EngineStore, InMemoryStore};

// ============================================================================
// Handlers
// ============================================================================

#[derive(Default)]
struct Tracking {
    runs: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
    order: Mutex<Vec<String>>,
    delay: Duration,
}

impl Tracking {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait]
impl JobHandler for Tracking {
    async fn execute(&self, ctx: &JobContext) -> JobResult {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.order.lock().push(ctx.key().name.clone());
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails until the given attempt.
struct Flaky {
    succeed_on: u32,
    attempts: AtomicUsize,
}

#[async_trait]
impl JobHandler for Flaky {
    async fn execute(&self, ctx: &JobContext) -> JobResult {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if ctx.attempt() < self.succeed_on {
            return Err(JobError::retryable(format!("attempt {} failed", ctx.attempt())));
        }
        Ok(())
    }
}

/// Panics on its first attempt.
#[derive(Default)]
struct PanicsOnce {
    attempts: AtomicUsize,
}

#[async_trait]
impl JobHandler for PanicsOnce {
    async fn execute(&self, ctx: &JobContext) -> JobResult {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if ctx.attempt() == 1 {
            panic!("manifest parser blew up");
        }
        Ok(())
    }
}

struct Hanging;

#[async_trait]
impl JobHandler for Hanging {
    async fn execute(&self, _ctx: &JobContext) -> JobResult {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_millis(50))
    }
}

#[derive(Default)]
struct Outcomes {
    seen: Mutex<Vec<JobOutcome>>,
}

#[async_trait]
impl CompletionListener for Outcomes {
    fn name(&self) -> &str {
        "outcomes"
    }

    async fn on_job_completed(&self, outcome: &JobOutcome) -> tollgate_core::Result<()> {
        self.seen.lock().push(outcome.clone());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

fn runtime_config(workers: usize) -> RuntimeConfig {
    RuntimeConfig {
        worker_pool_size: workers,
        poll_interval: Duration::from_millis(10),
        default_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(2),
    }
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        release_delay: Duration::from_millis(5),
        ..EngineConfig::default()
    }
}

async fn start(
    store: Arc<InMemoryStore>,
    registry: JobRegistry,
    workers: usize,
) -> (Arc<LocalRuntime>, Arc<SchedulingEngine>) {
    let registry = Arc::new(registry);
    let runtime = Arc::new(LocalRuntime::new(
        "node-1",
        runtime_config(workers),
        store.clone(),
        registry.clone(),
    ));
    let engine = Arc::new(SchedulingEngine::new(
        engine_config(),
        store,
        runtime.clone(),
        registry,
    ));
    runtime.start().await.unwrap();
    (runtime, engine)
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn job(name: &str, kind: JobKind) -> JobDefinition {
    JobDefinition::new(JobKey::new(name, kind.as_str()), kind, serde_json::Value::Null)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_enqueued_job_executes() {
    let handler = Arc::new(Tracking::default());
    let registry = JobRegistry::new(PriorityTable::standard())
        .register(JobKind::MirrorExtension, handler.clone());
    let (runtime, engine) = start(InMemoryStore::arc(), registry, 2).await;

    engine.enqueue(job("a", JobKind::MirrorExtension)).await.unwrap();

    assert!(wait_for(|| handler.runs.load(Ordering::SeqCst) == 1).await);
    assert!(wait_for(|| runtime.pool_stats().succeeded == 1).await);
    assert!(runtime.shutdown().await);
}

#[tokio::test]
async fn test_concurrency_bounded_by_pool() {
    let handler = Arc::new(Tracking::with_delay(Duration::from_millis(40)));
    let registry = JobRegistry::new(PriorityTable::standard())
        .register(JobKind::MirrorExtension, handler.clone());
    let (runtime, engine) = start(InMemoryStore::arc(), registry, 2).await;

    for i in 0..6 {
        engine
            .enqueue(job(&format!("job-{i}"), JobKind::MirrorExtension))
            .await
            .unwrap();
    }

    assert!(wait_for(|| handler.runs.load(Ordering::SeqCst) == 6).await);
    assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    assert!(runtime.pool_stats().peak_concurrent <= 2);

    let stats = engine.queue_stats().await.unwrap();
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.complete, 6);
    assert!(runtime.shutdown().await);
}

#[tokio::test]
async fn test_failing_job_retried_until_success() {
    let handler = Arc::new(Flaky {
        succeed_on: 3,
        attempts: AtomicUsize::new(0),
    });
    let registry = JobRegistry::new(PriorityTable::standard())
        .register(JobKind::PublishExtension, handler.clone());
    let (runtime, engine) = start(InMemoryStore::arc(), registry, 1).await;

    let definition = engine
        .registry()
        .new_definition(JobKind::PublishExtension, JobKey::new("ext-1", "publish"), serde_json::Value::Null)
        .unwrap();
    engine.enqueue(definition).await.unwrap();

    assert!(wait_for(|| runtime.pool_stats().succeeded == 1).await);
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(runtime.pool_stats().failed, 2);
    assert!(runtime.shutdown().await);
}

#[tokio::test]
async fn test_panicking_job_runs_again() {
    let handler = Arc::new(PanicsOnce::default());
    let registry = JobRegistry::new(PriorityTable::standard())
        .register(JobKind::PublishExtension, handler.clone());
    let (runtime, engine) = start(InMemoryStore::arc(), registry, 1).await;
    let outcomes = Arc::new(Outcomes::default());
    engine.add_listener(outcomes.clone());

    let definition = engine
        .registry()
        .new_definition(JobKind::PublishExtension, JobKey::new("ext-2", "publish"), serde_json::Value::Null)
        .unwrap();
    engine.enqueue(definition).await.unwrap();

    assert!(wait_for(|| runtime.pool_stats().succeeded == 1).await);
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 2);

    assert!(wait_for(|| outcomes.seen.lock().len() == 2).await);
    let panicked = outcomes
        .seen
        .lock()
        .iter()
        .filter(|o| o.error.as_ref().and_then(|e| e.code.as_deref()) == Some("PANIC"))
        .count();
    assert_eq!(panicked, 1);
    assert!(runtime.shutdown().await);
}

#[tokio::test]
async fn test_chain_runs_second_after_first() {
    let handler = Arc::new(Tracking::with_delay(Duration::from_millis(20)));
    let registry = JobRegistry::new(PriorityTable::standard())
        .register(JobKind::MirrorExtension, handler.clone())
        .register(JobKind::MirrorMetadata, handler.clone());
    let (runtime, engine) = start(InMemoryStore::arc(), registry, 2).await;

    let first = job("extension", JobKind::MirrorExtension);
    engine
        .schedule_step("mirror", None, first.clone())
        .await
        .unwrap();
    engine
        .schedule_step("mirror", Some(&first.key), job("metadata", JobKind::MirrorMetadata))
        .await
        .unwrap();

    assert!(wait_for(|| handler.runs.load(Ordering::SeqCst) == 2).await);
    assert_eq!(*handler.order.lock(), vec!["extension".to_string(), "metadata".to_string()]);
    assert!(runtime.shutdown().await);
}

#[tokio::test]
async fn test_handler_timeout_reports_failure() {
    let registry = JobRegistry::new(PriorityTable::standard())
        .register(JobKind::MirrorSitemap, Arc::new(Hanging));
    let (runtime, engine) = start(InMemoryStore::arc(), registry, 1).await;
    let outcomes = Arc::new(Outcomes::default());
    engine.add_listener(outcomes.clone());

    engine.enqueue(job("sitemap", JobKind::MirrorSitemap)).await.unwrap();

    assert!(wait_for(|| !outcomes.seen.lock().is_empty()).await);
    let outcome = outcomes.seen.lock()[0].clone();
    assert!(!outcome.succeeded());
    assert_eq!(outcome.error.unwrap().code.as_deref(), Some("JobTimeout"));
    assert!(runtime.executing_jobs().is_empty());
    assert!(runtime.shutdown().await);
}

#[tokio::test]
async fn test_restart_recovers_pending_triggers() {
    let store = InMemoryStore::arc();
    let handler = Arc::new(Tracking::default());
    let registry = Arc::new(
        JobRegistry::new(PriorityTable::standard()).register(JobKind::DeleteExtension, handler.clone()),
    );

    // A runtime that armed a trigger and went away before it fired.
    let crashed = LocalRuntime::new("node-1", runtime_config(1), store.clone(), registry.clone());
    crashed
        .schedule_now(&job("gone", JobKind::DeleteExtension), Duration::from_millis(50))
        .await
        .unwrap();

    let restarted = LocalRuntime::new("node-1", runtime_config(1), store.clone(), registry);
    assert_eq!(restarted.start().await.unwrap(), 1);

    assert!(wait_for(|| handler.runs.load(Ordering::SeqCst) == 1).await);
    assert!(wait_for(|| restarted.pending_triggers().is_empty()).await);
    let stored = store
        .find_job(&JobKey::new("gone", "delete_extension"))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.trigger.is_none());
    assert!(restarted.shutdown().await);
}

#[tokio::test]
async fn test_shutdown_waits_for_running_jobs() {
    let handler = Arc::new(Tracking::with_delay(Duration::from_millis(100)));
    let registry = JobRegistry::new(PriorityTable::standard())
        .register(JobKind::MirrorExtension, handler.clone());
    let (runtime, engine) = start(InMemoryStore::arc(), registry, 1).await;

    engine.enqueue(job("slow", JobKind::MirrorExtension)).await.unwrap();
    assert!(wait_for(|| !runtime.executing_jobs().is_empty()).await);

    assert!(runtime.shutdown().await);
    assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
    assert!(!runtime.is_running());
}
