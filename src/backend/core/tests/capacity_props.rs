//! Property tests of the dispatch pass.
//!
//! For arbitrary pool sizes, busy counts and backlogs, one pass releases
//! exactly `min(backlog, max(pool - busy, 0))` entries, in ascending
//! priority order with ties broken by submission order.

use proptest::prelude::*;

use tollgate_core::jobs::{JobDefinition, JobKey, JobKind, JobQueue, JobRuntime, RecordingRuntime};
use tollgate_core::store::InMemoryStore;

fn run_pass(pool: usize, busy: usize, priorities: &[i32]) -> Vec<JobKey> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async {
        let store = InMemoryStore::arc();
        let runtime = RecordingRuntime::arc("node-1", pool);
        let queue = JobQueue::new("default", store, runtime.clone());

        // Hold every entry back while the backlog is built.
        runtime.set_busy(pool);
        for (i, priority) in priorities.iter().enumerate() {
            let key = JobKey::new(format!("job-{i}"), "mirror");
            runtime
                .store_job(
                    &JobDefinition::new(key.clone(), JobKind::MirrorExtension, serde_json::Value::Null),
                    true,
                )
                .await
                .unwrap();
            queue.submit(&key, *priority, false).await.unwrap();
        }
        assert!(runtime.released().is_empty());

        runtime.set_busy(busy);
        queue.dispatch().await.unwrap().released().to_vec()
    })
}

proptest! {
    #[test]
    fn prop_pass_respects_capacity_and_order(
        pool in 1usize..8,
        busy in 0usize..10,
        priorities in prop::collection::vec(0i32..6, 0..24),
    ) {
        let released = run_pass(pool, busy, &priorities);

        let capacity = pool.saturating_sub(busy);
        prop_assert_eq!(released.len(), capacity.min(priorities.len()));

        let mut expected: Vec<(i32, usize)> = priorities
            .iter()
            .enumerate()
            .map(|(i, p)| (*p, i))
            .collect();
        expected.sort();
        let expected: Vec<JobKey> = expected
            .into_iter()
            .take(released.len())
            .map(|(_, i)| JobKey::new(format!("job-{i}"), "mirror"))
            .collect();
        prop_assert_eq!(released, expected);
    }
}

#[test]
fn test_zero_free_capacity_releases_nothing() {
    assert!(run_pass(3, 3, &[1, 2, 3]).is_empty());
    assert!(run_pass(3, 7, &[1]).is_empty());
}
