//! In-memory store for tests, development and single-process use.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{
    ChainLink, EngineStore, EntryState, QueueCounts, QueueEntry, RecurringBinding, StoredJob,
};
use crate::error::{ErrorCode, Result, TollgateError};
use crate::jobs::JobKey;

#[derive(Debug, Default)]
struct State {
    bindings: BTreeMap<String, RecurringBinding>,
    queue: BTreeMap<i64, QueueEntry>,
    links: BTreeMap<i64, ChainLink>,
    jobs: HashMap<JobKey, StoredJob>,
    sequence: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    offline: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Simulate an outage: while offline every operation fails with
    /// `StoreConnectionFailed`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn state(&self) -> Result<parking_lot::MutexGuard<'_, State>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TollgateError::with_internal(
                ErrorCode::StoreConnectionFailed,
                "Unable to connect to the durable store",
                "in-memory store is offline",
            ));
        }
        Ok(self.state.lock())
    }
}

#[async_trait]
impl EngineStore for InMemoryStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Recurring bindings
    // ─────────────────────────────────────────────────────────────────────────

    async fn find_binding(&self, logical_name: &str) -> Result<Option<RecurringBinding>> {
        Ok(self.state()?.bindings.get(logical_name).cloned())
    }

    async fn insert_binding(&self, binding: &RecurringBinding) -> Result<()> {
        let mut state = self.state()?;
        if state.bindings.contains_key(&binding.logical_name) {
            return Err(TollgateError::new(
                ErrorCode::DuplicateRecord,
                format!("Recurring binding already exists: {}", binding.logical_name),
            ));
        }
        state
            .bindings
            .insert(binding.logical_name.clone(), binding.clone());
        Ok(())
    }

    async fn update_binding(&self, binding: &RecurringBinding) -> Result<()> {
        let mut state = self.state()?;
        match state.bindings.get_mut(&binding.logical_name) {
            Some(existing) => {
                *existing = binding.clone();
                existing.updated_at = Utc::now();
                Ok(())
            }
            None => Err(TollgateError::new(
                ErrorCode::BindingNotFound,
                format!("Recurring binding not found: {}", binding.logical_name),
            )),
        }
    }

    async fn delete_binding(&self, logical_name: &str) -> Result<bool> {
        Ok(self.state()?.bindings.remove(logical_name).is_some())
    }

    async fn list_bindings(&self) -> Result<Vec<RecurringBinding>> {
        Ok(self.state()?.bindings.values().cloned().collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue entries
    // ─────────────────────────────────────────────────────────────────────────

    async fn find_queue_entry(
        &self,
        instance: &str,
        queue: &str,
        key: &JobKey,
    ) -> Result<Option<QueueEntry>> {
        Ok(self
            .state()?
            .queue
            .values()
            .find(|e| e.instance == instance && e.queue == queue && &e.key == key)
            .cloned())
    }

    async fn insert_queue_entry(
        &self,
        instance: &str,
        queue: &str,
        key: &JobKey,
        priority: i32,
    ) -> Result<QueueEntry> {
        let mut state = self.state()?;
        let duplicate = state
            .queue
            .values()
            .any(|e| e.instance == instance && e.queue == queue && &e.key == key);
        if duplicate {
            return Err(TollgateError::new(
                ErrorCode::DuplicateRecord,
                format!("Queue entry already exists: {}", key),
            ));
        }

        let now = Utc::now();
        let entry = QueueEntry {
            id: state.next_id(),
            instance: instance.to_string(),
            queue: queue.to_string(),
            key: key.clone(),
            priority,
            state: EntryState::Waiting,
            created_at: now,
            updated_at: now,
        };
        state.queue.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn reset_queue_entry(&self, id: i64, priority: i32) -> Result<()> {
        let mut state = self.state()?;
        let entry = state
            .queue
            .get_mut(&id)
            .ok_or_else(|| TollgateError::not_found("queue entry", id.to_string()))?;
        entry.priority = priority;
        entry.state = EntryState::Waiting;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn fetch_waiting(
        &self,
        instance: &str,
        queue: &str,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let state = self.state()?;
        let mut waiting: Vec<_> = state
            .queue
            .values()
            .filter(|e| e.instance == instance && e.queue == queue && e.state == EntryState::Waiting)
            .cloned()
            .collect();
        waiting.sort_by_key(|e| (e.priority, e.id));
        waiting.truncate(limit);
        Ok(waiting)
    }

    async fn complete_queue_entry(&self, id: i64) -> Result<()> {
        let mut state = self.state()?;
        let entry = state
            .queue
            .get_mut(&id)
            .ok_or_else(|| TollgateError::not_found("queue entry", id.to_string()))?;
        entry.state = EntryState::Complete;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn list_queue_entries(
        &self,
        instance: &str,
        queue: Option<&str>,
        state_filter: Option<EntryState>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let state = self.state()?;
        let mut entries: Vec<_> = state
            .queue
            .values()
            .filter(|e| e.instance == instance)
            .filter(|e| queue.map_or(true, |q| e.queue == q))
            .filter(|e| state_filter.map_or(true, |s| e.state == s))
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.priority, e.id));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn queue_counts(&self, instance: &str, queue: &str) -> Result<QueueCounts> {
        let state = self.state()?;
        let mut counts = QueueCounts::default();
        for entry in state
            .queue
            .values()
            .filter(|e| e.instance == instance && e.queue == queue)
        {
            match entry.state {
                EntryState::Waiting => counts.waiting += 1,
                EntryState::Complete => counts.complete += 1,
            }
        }
        Ok(counts)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chain links
    // ─────────────────────────────────────────────────────────────────────────

    async fn upsert_chain_link(
        &self,
        instance: &str,
        chain: &str,
        first: &JobKey,
        second: &JobKey,
    ) -> Result<ChainLink> {
        let mut state = self.state()?;
        let now = Utc::now();

        for link in state.links.values_mut() {
            if link.instance == instance
                && link.chain == chain
                && &link.first == first
                && &link.second != second
                && link.state == EntryState::Waiting
            {
                link.state = EntryState::Complete;
                link.updated_at = now;
            }
        }

        let existing = state.links.values_mut().find(|l| {
            l.instance == instance && l.chain == chain && &l.first == first && &l.second == second
        });
        if let Some(link) = existing {
            link.state = EntryState::Waiting;
            link.updated_at = now;
            return Ok(link.clone());
        }

        let link = ChainLink {
            id: state.next_id(),
            instance: instance.to_string(),
            chain: chain.to_string(),
            first: first.clone(),
            second: second.clone(),
            state: EntryState::Waiting,
            created_at: now,
            updated_at: now,
        };
        state.links.insert(link.id, link.clone());
        Ok(link)
    }

    async fn find_waiting_chain_link(
        &self,
        instance: &str,
        chain: &str,
        first: &JobKey,
    ) -> Result<Option<ChainLink>> {
        // BTreeMap iterates in id order, so the first match is the oldest.
        Ok(self
            .state()?
            .links
            .values()
            .find(|l| {
                l.instance == instance
                    && l.chain == chain
                    && &l.first == first
                    && l.state == EntryState::Waiting
            })
            .cloned())
    }

    async fn waiting_chains_for(&self, instance: &str, first: &JobKey) -> Result<Vec<String>> {
        let state = self.state()?;
        let chains: BTreeSet<String> = state
            .links
            .values()
            .filter(|l| l.instance == instance && &l.first == first && l.state == EntryState::Waiting)
            .map(|l| l.chain.clone())
            .collect();
        Ok(chains.into_iter().collect())
    }

    async fn transition_chain_link(
        &self,
        id: i64,
        from: EntryState,
        to: EntryState,
    ) -> Result<bool> {
        let mut state = self.state()?;
        match state.links.get_mut(&id) {
            Some(link) if link.state == from => {
                link.state = to;
                link.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_chain_links(
        &self,
        instance: &str,
        chain: Option<&str>,
        state_filter: Option<EntryState>,
    ) -> Result<Vec<ChainLink>> {
        Ok(self
            .state()?
            .links
            .values()
            .filter(|l| l.instance == instance)
            .filter(|l| chain.map_or(true, |c| l.chain == c))
            .filter(|l| state_filter.map_or(true, |s| l.state == s))
            .cloned()
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Job definitions
    // ─────────────────────────────────────────────────────────────────────────

    async fn save_job(&self, job: &StoredJob) -> Result<()> {
        let mut stored = job.clone();
        stored.updated_at = Utc::now();
        self.state()?.jobs.insert(job.key().clone(), stored);
        Ok(())
    }

    async fn find_job(&self, key: &JobKey) -> Result<Option<StoredJob>> {
        Ok(self.state()?.jobs.get(key).cloned())
    }

    async fn delete_job(&self, key: &JobKey) -> Result<bool> {
        Ok(self.state()?.jobs.remove(key).is_some())
    }

    async fn list_armed_jobs(&self) -> Result<Vec<StoredJob>> {
        let state = self.state()?;
        let mut armed: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.trigger.is_some())
            .cloned()
            .collect();
        armed.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(armed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobDefinition, JobKind, Trigger};

    fn key(name: &str) -> JobKey {
        JobKey::new(name, "test")
    }

    #[tokio::test]
    async fn test_fetch_waiting_orders_by_priority_then_sequence() {
        let store = InMemoryStore::new();
        store.insert_queue_entry("a", "q", &key("low"), 5).await.unwrap();
        store.insert_queue_entry("a", "q", &key("high-1"), 1).await.unwrap();
        store.insert_queue_entry("a", "q", &key("high-2"), 1).await.unwrap();
        store.insert_queue_entry("b", "q", &key("other"), 0).await.unwrap();

        let waiting = store.fetch_waiting("a", "q", 10).await.unwrap();
        let names: Vec<_> = waiting.iter().map(|e| e.key.name.as_str()).collect();
        assert_eq!(names, vec!["high-1", "high-2", "low"]);

        let limited = store.fetch_waiting("a", "q", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_queue_entry_rejected() {
        let store = InMemoryStore::new();
        store.insert_queue_entry("a", "q", &key("x"), 1).await.unwrap();
        let err = store.insert_queue_entry("a", "q", &key("x"), 1).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateRecord);
    }

    #[tokio::test]
    async fn test_reset_keeps_sequence() {
        let store = InMemoryStore::new();
        let first = store.insert_queue_entry("a", "q", &key("x"), 5).await.unwrap();
        store.complete_queue_entry(first.id).await.unwrap();
        store.reset_queue_entry(first.id, 2).await.unwrap();

        let entry = store.find_queue_entry("a", "q", &key("x")).await.unwrap().unwrap();
        assert_eq!(entry.id, first.id);
        assert_eq!(entry.priority, 2);
        assert_eq!(entry.state, EntryState::Waiting);
    }

    #[tokio::test]
    async fn test_chain_link_compare_and_set() {
        let store = InMemoryStore::new();
        let link = store
            .upsert_chain_link("a", "sync", &key("x"), &key("y"))
            .await
            .unwrap();

        assert!(store
            .transition_chain_link(link.id, EntryState::Waiting, EntryState::Complete)
            .await
            .unwrap());
        assert!(!store
            .transition_chain_link(link.id, EntryState::Waiting, EntryState::Complete)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_relinking_retires_previous_second() {
        let store = InMemoryStore::new();
        store.upsert_chain_link("a", "sync", &key("x"), &key("y")).await.unwrap();
        store.upsert_chain_link("a", "sync", &key("x"), &key("z")).await.unwrap();

        let waiting = store
            .find_waiting_chain_link("a", "sync", &key("x"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(waiting.second, key("z"));
        assert_eq!(
            store.list_chain_links("a", Some("sync"), None).await.unwrap().len(),
            2
        );
        assert_eq!(
            store.waiting_chains_for("a", &key("x")).await.unwrap(),
            vec!["sync".to_string()]
        );
    }

    #[tokio::test]
    async fn test_armed_jobs() {
        let store = InMemoryStore::new();
        let idle = StoredJob::new(
            JobDefinition::new(key("idle"), JobKind::MirrorExtension, serde_json::Value::Null),
            None,
        );
        let armed = StoredJob::new(
            JobDefinition::new(key("armed"), JobKind::MirrorExtension, serde_json::Value::Null),
            Some(Trigger::once(Utc::now())),
        );
        store.save_job(&idle).await.unwrap();
        store.save_job(&armed).await.unwrap();

        let jobs = store.list_armed_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].key(), &key("armed"));
        assert!(store.delete_job(&key("idle")).await.unwrap());
        assert!(!store.delete_job(&key("idle")).await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = InMemoryStore::new();
        store.set_offline(true);
        let err = store.list_bindings().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StoreConnectionFailed);
        assert!(err.is_retryable());

        store.set_offline(false);
        assert!(store.list_bindings().await.unwrap().is_empty());
    }
}
