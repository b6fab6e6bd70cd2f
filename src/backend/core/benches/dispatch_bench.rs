//! Benchmarks for the admission queue.
//!
//! Run with: cargo bench --bench dispatch_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use tollgate_core::jobs::{JobDefinition, JobKey, JobKind, JobQueue, JobRuntime, RecordingRuntime};
use tollgate_core::store::InMemoryStore;

async fn backlog(pool: usize, entries: usize) -> (Arc<RecordingRuntime>, JobQueue) {
    let store = InMemoryStore::arc();
    let runtime = RecordingRuntime::arc("bench", pool);
    let queue = JobQueue::new("default", store, runtime.clone());

    runtime.set_busy(pool);
    for i in 0..entries {
        let key = JobKey::new(format!("job-{i}"), "mirror");
        let definition = JobDefinition::new(key.clone(), JobKind::MirrorExtension, serde_json::Value::Null);
        runtime.store_job(&definition, true).await.expect("store job");
        queue
            .submit(&key, (i % 10) as i32, false)
            .await
            .expect("submit");
    }
    (runtime, queue)
}

/// A full pass releasing the whole backlog.
fn bench_release_pass(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("release_pass");

    for entries in [10usize, 100, 500].iter() {
        group.throughput(Throughput::Elements(*entries as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entries), entries, |b, &count| {
            b.to_async(&rt).iter(|| async move {
                let (runtime, queue) = backlog(count, count).await;
                runtime.set_busy(0);
                black_box(queue.dispatch().await.expect("dispatch"))
            });
        });
    }
    group.finish();
}

/// A pass that finds no capacity in front of a large backlog.
fn bench_starved_pass(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let (_runtime, queue) = rt.block_on(backlog(8, 1_000));

    c.bench_function("starved_pass", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(queue.dispatch().await.expect("dispatch")) });
    });
}

/// Re-submitting an entry that is already waiting.
fn bench_duplicate_submit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let (_runtime, queue) = rt.block_on(backlog(8, 1_000));
    let key = JobKey::new("job-500", "mirror");

    c.bench_function("duplicate_submit", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(queue.submit(&key, 0, false).await.expect("submit")) });
    });
}

criterion_group!(benches, bench_release_pass, bench_starved_pass, bench_duplicate_submit);
criterion_main!(benches);
